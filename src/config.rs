use std::env;
use anyhow::{bail, Context, Result};

const DEFAULT_LEDGER_SECRET: &str = "genii-sovereign-secret";
const DEFAULT_AUDITOR_KEY: &str = "FIN_AC_001";

/// Which persistence layer backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Spanner,
    Memory,
}

/// Connection settings for Cloud Spanner
#[derive(Debug, Clone)]
pub struct SpannerSettings {
    pub emulator_host: Option<String>,
    pub project: String,
    pub instance: String,
    pub database: String,
}

impl SpannerSettings {
    pub fn database_path(&self) -> String {
        format!(
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub spanner: Option<SpannerSettings>,
    pub service_port: u16,
    pub service_host: String,
    pub ledger_secret: String,
    pub ledger_auditor_key: String,
    pub n8n_webhook_url: Option<String>,
    pub event_bus_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "spanner".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "spanner" => StorageBackend::Spanner,
            "memory" => StorageBackend::Memory,
            other => bail!("STORAGE_BACKEND must be 'spanner' or 'memory', got '{}'", other),
        };

        let spanner = if storage_backend == StorageBackend::Spanner {
            Some(SpannerSettings {
                emulator_host: env::var("SPANNER_EMULATOR_HOST").ok(),
                project: env::var("SPANNER_PROJECT")
                    .context("SPANNER_PROJECT environment variable is required")?,
                instance: env::var("SPANNER_INSTANCE")
                    .context("SPANNER_INSTANCE environment variable is required")?,
                database: env::var("SPANNER_DATABASE")
                    .context("SPANNER_DATABASE environment variable is required")?,
            })
        } else {
            None
        };

        let service_port = env::var("SERVICE_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("SERVICE_PORT must be a valid port number (0-65535)")?;

        let service_host = env::var("SERVICE_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let ledger_secret = env::var("LEDGER_SECRET")
            .unwrap_or_else(|_| DEFAULT_LEDGER_SECRET.to_string());
        if ledger_secret.is_empty() {
            bail!("LEDGER_SECRET must not be empty");
        }

        let ledger_auditor_key = env::var("LEDGER_AUDITOR_KEY")
            .unwrap_or_else(|_| DEFAULT_AUDITOR_KEY.to_string());

        let n8n_webhook_url = env::var("N8N_WEBHOOK_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let event_bus_capacity = env::var("EVENT_BUS_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()
            .context("EVENT_BUS_CAPACITY must be a positive integer")?;
        if event_bus_capacity == 0 {
            bail!("EVENT_BUS_CAPACITY must be a positive integer");
        }

        Ok(Config {
            storage_backend,
            spanner,
            service_port,
            service_host,
            ledger_secret,
            ledger_auditor_key,
            n8n_webhook_url,
            event_bus_capacity,
        })
    }

    /// Configuration for an in-memory instance
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Config {
            storage_backend: StorageBackend::Memory,
            spanner: None,
            service_port: 3000,
            service_host: "127.0.0.1".to_string(),
            ledger_secret: DEFAULT_LEDGER_SECRET.to_string(),
            ledger_auditor_key: DEFAULT_AUDITOR_KEY.to_string(),
            n8n_webhook_url: None,
            event_bus_capacity: 256,
        }
    }

    pub fn log_startup(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  Storage backend: {:?}", self.storage_backend);
        if let Some(spanner) = &self.spanner {
            tracing::info!("  Spanner emulator: {}",
                spanner.emulator_host.as_deref().unwrap_or("disabled (using production)"));
            tracing::info!("  Spanner project: {}", spanner.project);
            tracing::info!("  Spanner instance: {}", spanner.instance);
            tracing::info!("  Spanner database: {}", spanner.database);
        }
        tracing::info!("  Ledger auditor key: {}", self.ledger_auditor_key);
        tracing::info!("  Provisioning webhook: {}",
            self.n8n_webhook_url.as_deref().unwrap_or("disabled"));
        tracing::info!("  Event bus capacity: {}", self.event_bus_capacity);
        tracing::info!("  Service listening on: {}:{}", self.service_host, self.service_port);

        if self.ledger_secret == DEFAULT_LEDGER_SECRET {
            tracing::warn!("LEDGER_SECRET is not set; ledger signatures use the built-in default secret");
        }
    }
}

/// Serializes every test that reads or writes process environment variables
#[cfg(test)]
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
