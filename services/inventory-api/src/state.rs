use std::sync::Arc;

use fleetsync_reconcile::Reconciler;

use crate::config::SyncConfig;
use crate::db::{Database, PgComponentStore};

/// Handler state. Cloning shares the same pool and settings.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Shared>,
}

struct Shared {
    db: Database,
    sync: SyncConfig,
    environment: String,
}

impl AppState {
    pub fn new(db: Database, sync: SyncConfig, environment: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Shared {
                db,
                sync,
                environment: environment.into(),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.inner.sync
    }

    pub fn environment(&self) -> &str {
        &self.inner.environment
    }

    /// Built per request; holds only a pool handle.
    pub fn reconciler(&self) -> Reconciler<PgComponentStore> {
        Reconciler::new(self.db().component_store())
            .with_policy(self.inner.sync.deactivation_policy)
            .with_timeout(self.inner.sync.timeout)
    }
}
