//! Terminal lifecycle: builds every service once and owns the background work.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::api::{ApiClient, Backend};
use crate::config::TerminalConfig;
use crate::db::{self, DbState};
use crate::error::TerminalError;
use crate::models::{OrderLine, OrderSource};
use crate::peripherals::{self, Peripherals};
use crate::realtime::{Subscription, UpdateChannel};
use crate::submission::{OrderSubmitter, PlacedOrder};
use crate::sync::{SyncEngine, SyncHandle, SyncStatus};

/// Version and build details.
#[derive(Debug, Clone, Serialize)]
pub struct AboutInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

pub fn about() -> AboutInfo {
    AboutInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        git_sha: env!("BUILD_GIT_SHA"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}

pub struct Terminal {
    config: TerminalConfig,
    db: Arc<DbState>,
    api: Arc<ApiClient>,
    updates: Arc<UpdateChannel>,
    sync: Arc<SyncEngine>,
    sync_handle: SyncHandle,
    submitter: OrderSubmitter,
}

impl Terminal {
    /// Open the local store, connect the update channel and start the sync
    /// loop. Must be called from within a tokio runtime.
    pub fn start(config: TerminalConfig) -> Result<Self, TerminalError> {
        let db = Arc::new(db::init(&config.data_dir)?);
        let api = Arc::new(ApiClient::new(&config)?);
        let backend: Arc<dyn Backend> = api.clone();
        let peripherals: Arc<dyn Peripherals> = peripherals::detect(&config);

        let updates = Arc::new(UpdateChannel::new(&config));
        updates.connect();

        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&db),
            Arc::clone(&backend),
            config.sync_interval,
        ));
        let sync_handle = sync.start();

        let submitter = OrderSubmitter::new(Arc::clone(&db), backend, peripherals);

        info!(
            api = %config.api_base,
            ws = %updates.url(),
            data_dir = %config.data_dir.display(),
            "Terminal started"
        );

        Ok(Self {
            config,
            db,
            api,
            updates,
            sync,
            sync_handle,
            submitter,
        })
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<DbState> {
        &self.db
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn updates(&self) -> &Arc<UpdateChannel> {
        &self.updates
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn submitter(&self) -> &OrderSubmitter {
        &self.submitter
    }

    pub async fn place_order(
        &self,
        source: OrderSource,
        lines: Vec<OrderLine>,
    ) -> Result<PlacedOrder, TerminalError> {
        self.submitter.place_order(source, lines).await
    }

    pub fn on_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.updates.on_update(listener)
    }

    pub fn sync_status(&self) -> Result<SyncStatus, TerminalError> {
        Ok(self.sync.status()?)
    }

    /// Stop the sync timer and the update channel, then return.
    pub async fn shutdown(self) {
        info!("Terminal shutting down");
        self.sync_handle.stop().await;
        self.updates.shutdown().await;
        info!("Terminal stopped");
    }
}
