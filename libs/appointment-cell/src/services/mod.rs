pub mod conflict;
pub mod scheduler;
pub mod store;

pub use conflict::*;
pub use scheduler::*;
pub use store::*;
