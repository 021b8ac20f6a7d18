pub mod allocator;
pub mod store;

pub use allocator::*;
pub use store::*;
