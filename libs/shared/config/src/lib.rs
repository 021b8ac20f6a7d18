use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Which persistence backend the scheduling cells talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "supabase" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Server-side key for system writes (notifications, audit log).
    pub supabase_service_role_key: Option<String>,
    pub redis_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub scheduling_max_attempts: u32,
    pub scheduling_retry_backoff_ms: u64,
    pub scheduling_operation_timeout_ms: u64,
    pub scheduling_lock_ttl_ms: u64,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            supabase_service_role_key: None,
            redis_url: None,
            storage_backend: StorageBackend::Memory,
            scheduling_max_attempts: 5,
            scheduling_retry_backoff_ms: 20,
            scheduling_operation_timeout_ms: 10_000,
            scheduling_lock_ttl_ms: 5_000,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_JWT_SECRET not set, using empty value");
                String::new()
            });
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY").ok().filter(|key| !key.is_empty());
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let supabase_ready = !supabase_url.is_empty() && !supabase_anon_key.is_empty();
        let storage_backend = match env::var("SCHEDULING_STORAGE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, falling back to in-memory storage", e);
                StorageBackend::Memory
            }),
            Err(_) if supabase_ready => StorageBackend::Supabase,
            Err(_) => {
                warn!("SCHEDULING_STORAGE not set and Supabase not configured, using in-memory storage");
                StorageBackend::Memory
            }
        };

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_jwt_secret,
            supabase_service_role_key,
            redis_url,
            storage_backend,
            scheduling_max_attempts: parse_or("SCHEDULING_MAX_ATTEMPTS", defaults.scheduling_max_attempts),
            scheduling_retry_backoff_ms: parse_or("SCHEDULING_RETRY_BACKOFF_MS", defaults.scheduling_retry_backoff_ms),
            scheduling_operation_timeout_ms: parse_or(
                "SCHEDULING_OPERATION_TIMEOUT_MS",
                defaults.scheduling_operation_timeout_ms,
            ),
            scheduling_lock_ttl_ms: parse_or("SCHEDULING_LOCK_TTL_MS", defaults.scheduling_lock_ttl_ms),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduling_operation_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.scheduling_lock_ttl_ms)
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert_eq!(" Supabase ".parse::<StorageBackend>(), Ok(StorageBackend::Supabase));
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_default_scheduling_limits() {
        let config = AppConfig::default();
        assert_eq!(config.scheduling_max_attempts, 5);
        assert_eq!(config.operation_timeout(), Duration::from_secs(10));
        assert!(!config.is_configured());
        assert!(!config.is_redis_configured());
    }
}
