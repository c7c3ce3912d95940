use crate::config::Config;
use crate::events::EventBus;
use crate::ledger::LedgerSigner;
use crate::store::Store;
use crate::webhook::ProvisionWebhook;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: EventBus,
    pub signer: Arc<LedgerSigner>,
    pub webhook: ProvisionWebhook,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        AppState {
            store,
            bus: EventBus::new(config.event_bus_capacity),
            signer: Arc::new(LedgerSigner::new(
                config.ledger_secret.clone(),
                config.ledger_auditor_key.clone(),
            )),
            webhook: ProvisionWebhook::new(config.n8n_webhook_url.clone()),
        }
    }

    /// State backed by an empty in-memory store
    #[cfg(test)]
    pub fn for_tests() -> Self {
        AppState::with_store(Arc::new(crate::store::memory::MemoryStore::new()))
    }

    #[cfg(test)]
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        AppState::new(store, &Config::in_memory())
    }
}
