//! Background sync engine.
//!
//! Every tick pulls the menu delta from the backend and then pushes local
//! orders that have not reached it yet. At most one cycle runs at a time; a
//! forced cycle that starts while another is in flight is skipped. Errors are
//! logged and the timer keeps firing, so an offline terminal converges as
//! soon as the backend is reachable again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::Backend;
use crate::db::DbState;
use crate::error::{StorageResult, TerminalError};
use crate::menu;
use crate::models::CreateOrderRequest;
use crate::orders::{self, SyncFlag};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullReport {
    /// Watermark sent as `since`; `None` means a full pull.
    pub since: Option<DateTime<Utc>>,
    pub received: usize,
    pub written: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PushReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Claimed by a concurrent submission, or synced since the scan.
    pub skipped: usize,
}

/// What one cycle achieved. A phase that failed is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub pull: Option<PullReport>,
    pub push: Option<PushReport>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.pull.is_some() && self.push.as_ref().is_some_and(|p| p.failed == 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already in flight.
    Skipped,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub pending_orders: i64,
    pub synced_orders: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub in_flight: bool,
    pub cycles: u64,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Shortest accepted tick interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub struct SyncEngine {
    db: Arc<DbState>,
    backend: Arc<dyn Backend>,
    interval: Duration,
    in_flight: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    cycles: AtomicU64,
}

impl SyncEngine {
    /// `interval` below [`MIN_INTERVAL`] is raised to it.
    pub fn new(db: Arc<DbState>, backend: Arc<dyn Backend>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(requested_ms = interval.as_millis() as u64, "Sync interval too short, using minimum");
        }
        Self {
            db,
            backend,
            interval: interval.max(MIN_INTERVAL),
            in_flight: AtomicBool::new(false),
            last_sync: Mutex::new(None),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch menu changes newer than the cached watermark and upsert them.
    pub async fn pull_menu_delta(&self) -> Result<PullReport, TerminalError> {
        let since = menu::latest_updated_at(&self.db)?;
        let delta = self.backend.sync_menu(since).await?;
        let received = delta.menu.len();
        let written = if received > 0 {
            menu::apply_delta(&self.db, &delta.menu)?
        } else {
            0
        };
        debug!(since = ?since, received, written, "Menu delta pulled");
        Ok(PullReport {
            since,
            received,
            written,
        })
    }

    /// Submit every unsynced order, oldest first. Each order succeeds or
    /// fails on its own; failed orders stay unsynced for the next tick.
    /// Orders another caller is already submitting are left alone.
    pub async fn push_local_orders(&self) -> StorageResult<PushReport> {
        let pending = orders::pending_sync(&self.db)?;
        let mut report = PushReport::default();

        for order in pending {
            let Some(_claim) = self.db.try_claim(order.id) else {
                debug!(local_id = order.id, "Order submission in progress elsewhere, skipping");
                report.skipped += 1;
                continue;
            };
            // The scan may predate a submission that finished since.
            match orders::get_order(&self.db, order.id)? {
                Some(current) if current.synced == SyncFlag::Unsynced => {}
                _ => {
                    report.skipped += 1;
                    continue;
                }
            }

            report.attempted += 1;
            let request = CreateOrderRequest {
                source: order.source,
                items: order.items.clone(),
            };
            match self.backend.create_order(&request).await {
                Ok(resp) => match orders::mark_synced(&self.db, order.id, resp.remote_id()) {
                    Ok(_) => {
                        report.synced += 1;
                        info!(
                            local_id = order.id,
                            remote_order_id = ?resp.remote_id(),
                            "Order synced"
                        );
                    }
                    Err(e) => {
                        // Accepted remotely but not recorded; it will be sent again.
                        report.failed += 1;
                        error!(local_id = order.id, "Failed to mark order synced: {e}");
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    warn!(local_id = order.id, status = ?e.status(), "Order sync failed: {e}");
                }
            }
        }

        Ok(report)
    }

    /// Run one pull-then-push cycle unless one is already running.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            debug!("Sync cycle already in flight, skipping tick");
            return CycleOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let pull = match self.pull_menu_delta().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Menu pull failed: {e}");
                None
            }
        };

        let push = match self.push_local_orders().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Order push failed: {e}");
                None
            }
        };

        let report = CycleReport { pull, push };
        if report.is_clean() {
            *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        }
        if let Some(push) = &report.push {
            if push.attempted > 0 {
                info!(
                    attempted = push.attempted,
                    synced = push.synced,
                    failed = push.failed,
                    "Sync cycle complete"
                );
            }
        }
        CycleOutcome::Completed(report)
    }

    /// Run a cycle now, outside the timer.
    pub async fn force_sync(&self) -> CycleOutcome {
        info!("Forced sync requested");
        self.run_cycle().await
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StorageResult<SyncStatus> {
        let (pending_orders, synced_orders) = orders::sync_counts(&self.db)?;
        Ok(SyncStatus {
            pending_orders,
            synced_orders,
            last_sync: *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner),
            in_flight: self.is_in_flight(),
            cycles: self.cycles.load(Ordering::Relaxed),
        })
    }

    /// Start the periodic loop. The first cycle runs one interval from now.
    /// Cycles run inside the loop task; ticks missed during a slow cycle are
    /// delayed, not queued.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let engine = Arc::clone(self);
        let token = CancellationToken::new();
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            info!(interval_ms = engine.interval.as_millis() as u64, "Sync loop started");
            let mut ticker = interval_at(Instant::now() + engine.interval, engine.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Not raced against `cancel`: a started cycle always finishes.
                        engine.run_cycle().await;
                    }
                }
            }
            info!("Sync loop stopped");
        });

        SyncHandle {
            token,
            task: Some(task),
        }
    }
}

/// Running sync loop. Dropping the handle also stops the loop.
pub struct SyncHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timer and wait for the loop task to exit. A cycle in flight
    /// is finished first, so nothing touches the backend or the store after
    /// this returns.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Sync loop task failed: {e}");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
