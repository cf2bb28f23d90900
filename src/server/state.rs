use std::sync::Arc;

use tracing::info;

use crate::{
    checkin::CheckInService,
    config::Config,
    core::store::RegistrationStore,
    persist::{OpSink, PersistError, sqlite::SqliteOpSink},
    runtime::handle::{RegistryHandle, spawn_registry},
};

/// State shared by every request handler.
pub struct AppState {
    /// Configuration the server was started with.
    pub config: Config,
    /// Check-in operations on the running registry.
    pub service: CheckInService,
}

impl AppState {
    /// Replays the configured journal and starts the registration runtime.
    pub fn open(config: Config) -> Result<Arc<Self>, PersistError> {
        let registry = open_registry(&config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// State around an already running registry.
    pub fn with_registry(config: Config, registry: RegistryHandle) -> Arc<Self> {
        let service = CheckInService::new(registry, config.checkin.rescan);
        Arc::new(Self { config, service })
    }

    /// Registry handle behind the service.
    pub fn registry(&self) -> &RegistryHandle {
        self.service.registry()
    }
}

/// Loads the store from `config.database` and spawns its runtime.
pub fn open_registry(config: &Config) -> Result<RegistryHandle, PersistError> {
    let sink = match &config.database.path {
        Some(path) => {
            info!(path = %path.display(), "opening registration journal");
            SqliteOpSink::open(path)?
        }
        None => {
            info!("no database path configured, journaling in memory");
            SqliteOpSink::open_in_memory()?
        }
    };
    let store: RegistrationStore = sink.load_store()?;
    info!(registrations = store.len(), "registration store loaded");

    let sink: Box<dyn OpSink> = Box::new(sink);
    Ok(spawn_registry(store, Some(sink), config.runtime.clone()))
}
