use std::sync::Arc;

use tracing::{info, warn};

use appointment_cell::services::scheduler::AppointmentScheduler;
use appointment_cell::services::store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
use queue_ticket_cell::services::allocator::QueueTicketAllocator;
use queue_ticket_cell::services::store::{InMemoryQueueStore, QueueStore, SupabaseQueueStore};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;
use shared_scheduling::{
    CollaboratorDispatch, Directory, OpenDirectory, SchedulingLock, SupabaseAuditRecorder, SupabaseDirectory,
    SupabaseNotifier,
};

/// The two scheduling components behind the gateway.
pub struct SchedulingServices {
    pub appointments: Arc<AppointmentScheduler>,
    pub queue: Arc<QueueTicketAllocator>,
}

pub fn build_services(config: &AppConfig) -> anyhow::Result<SchedulingServices> {
    let locks = Arc::new(SchedulingLock::from_config(config)?);

    let supabase = config
        .is_configured()
        .then(|| Arc::new(SupabaseClient::new(config)));

    let directory: Arc<dyn Directory> = match &supabase {
        Some(client) => Arc::new(SupabaseDirectory::new(client.clone())),
        None => {
            warn!("Supabase not configured; every directory reference is treated as active");
            Arc::new(OpenDirectory)
        }
    };

    let dispatch = match &supabase {
        Some(client) => {
            let service_key = config.supabase_service_role_key.clone();
            if service_key.is_none() {
                warn!("SUPABASE_SERVICE_ROLE_KEY not set; notification and audit inserts use the anon key");
            }
            CollaboratorDispatch::new(
                Arc::new(SupabaseNotifier::new(client.clone(), service_key.clone())),
                Arc::new(SupabaseAuditRecorder::new(client.clone(), service_key)),
            )
        }
        None => CollaboratorDispatch::tracing_only(),
    };

    let (appointment_store, queue_store): (Arc<dyn AppointmentStore>, Arc<dyn QueueStore>) =
        match (config.storage_backend, &supabase) {
            (StorageBackend::Supabase, Some(client)) => {
                info!("Scheduling storage: Supabase");
                (
                    Arc::new(SupabaseAppointmentStore::new(client.clone())),
                    Arc::new(SupabaseQueueStore::new(client.clone())),
                )
            }
            (StorageBackend::Supabase, None) => {
                anyhow::bail!("SCHEDULING_STORAGE=supabase requires SUPABASE_URL and SUPABASE_ANON_PUBLIC_KEY")
            }
            (StorageBackend::Memory, _) => {
                warn!("Scheduling storage: in-memory, data is lost on restart");
                (Arc::new(InMemoryAppointmentStore::new()), Arc::new(InMemoryQueueStore::new()))
            }
        };

    let appointments = AppointmentScheduler::configured(config, appointment_store, directory.clone())
        .with_locks(locks.clone())
        .with_collaborators(dispatch.clone());

    let queue = QueueTicketAllocator::configured(config, queue_store, directory)
        .with_locks(locks)
        .with_collaborators(dispatch);

    Ok(SchedulingServices {
        appointments: Arc::new(appointments),
        queue: Arc::new(queue),
    })
}
