use std::sync::Arc;

use crate::application::daemon::DaemonHealth;
use crate::application::exports::ExportLedgerService;
use crate::application::queue::RenderQueueService;
use crate::application::rasterize::CardRasterizer;
use crate::infra::db::PostgresRepositories;
use crate::infra::storage::FilesystemObjectStorage;

/// Shared handler state. Queue, ledger and database are absent when the
/// service runs without Postgres; their routes are then not mounted.
#[derive(Clone)]
pub struct HttpState {
    pub rasterizer: Arc<CardRasterizer>,
    pub daemon: DaemonHealth,
    pub database: Option<PostgresRepositories>,
    pub queue: Option<Arc<RenderQueueService>>,
    pub ledger: Option<Arc<ExportLedgerService>>,
    pub artifacts: Option<Arc<FilesystemObjectStorage>>,
}

impl HttpState {
    pub fn new(rasterizer: Arc<CardRasterizer>, daemon: DaemonHealth) -> Self {
        Self {
            rasterizer,
            daemon,
            database: None,
            queue: None,
            ledger: None,
            artifacts: None,
        }
    }

    pub fn with_database(mut self, database: PostgresRepositories) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_queue(mut self, queue: Arc<RenderQueueService>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<ExportLedgerService>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<FilesystemObjectStorage>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }
}
