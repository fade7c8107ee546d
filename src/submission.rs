//! Interactive order placement for the POS and kiosk screens.
//!
//! The local write comes first and is the only step whose failure reaches the
//! operator. The remote submission is attempted once; if it fails the order
//! stays queued for the sync engine and the local id is shown instead of a
//! server number.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::Backend;
use crate::db::DbState;
use crate::error::TerminalError;
use crate::menu;
use crate::models::{CreateOrderRequest, MenuItem, OrderDetailed, OrderLine, OrderSource, OrderStatus, ReceiptPayload};
use crate::orders::{self, NewLocalOrder, OrderFilter, OrderPatch};
use crate::peripherals::Peripherals;

#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Backend accepted the order.
    Confirmed {
        remote_order_id: Option<i64>,
        detail: Option<OrderDetailed>,
    },
    /// Backend unreachable or refused; the sync engine will retry.
    Queued { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub local_id: i64,
    pub source: OrderSource,
    pub placement: Placement,
}

impl PlacedOrder {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.placement, Placement::Confirmed { .. })
    }

    /// Number shown to the customer: the server id when known, else the
    /// local id.
    pub fn display_id(&self) -> i64 {
        match self.placement {
            Placement::Confirmed {
                remote_order_id: Some(id),
                ..
            } => id,
            _ => self.local_id,
        }
    }
}

/// Result of a full menu refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuSnapshot {
    pub items: Vec<MenuItem>,
    /// `false` when the backend could not be reached and the cache was used.
    pub fresh: bool,
}

pub struct OrderSubmitter {
    db: Arc<DbState>,
    backend: Arc<dyn Backend>,
    peripherals: Arc<dyn Peripherals>,
}

impl OrderSubmitter {
    pub fn new(db: Arc<DbState>, backend: Arc<dyn Backend>, peripherals: Arc<dyn Peripherals>) -> Self {
        Self {
            db,
            backend,
            peripherals,
        }
    }

    /// Record an order locally and try to hand it to the backend.
    ///
    /// Returns `Err` only for invalid input (nothing written) or a storage
    /// failure on the local write. Network and server errors produce
    /// `Placement::Queued`.
    pub async fn place_order(
        &self,
        source: OrderSource,
        lines: Vec<OrderLine>,
    ) -> Result<PlacedOrder, TerminalError> {
        validate_lines(&lines)?;

        // Claimed before the row is visible, so the sync push skips it while
        // this call is talking to the backend.
        let claim = orders::add_order_claimed(&self.db, &NewLocalOrder::pending(source, lines.clone()))
            .map_err(|e| {
                error!(source = %source, "Failed to record order locally: {e}");
                TerminalError::Storage(e)
            })?;
        let local_id = claim.id();

        let request = CreateOrderRequest {
            source,
            items: lines,
        };
        let resp = match self.backend.create_order(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                drop(claim);
                warn!(local_id, status = ?e.status(), "Order queued for later sync: {e}");
                return Ok(PlacedOrder {
                    local_id,
                    source,
                    placement: Placement::Queued {
                        reason: e.to_string(),
                    },
                });
            }
        };

        let remote_order_id = resp.remote_id();
        if let Err(e) = orders::mark_synced(&self.db, local_id, remote_order_id) {
            // The backend has it; a later push would send it again.
            error!(local_id, remote_order_id = ?remote_order_id, "Order accepted but not marked synced: {e}");
        }
        drop(claim);
        info!(local_id, remote_order_id = ?remote_order_id, source = %source, "Order placed");

        let detail = match remote_order_id {
            Some(id) => self.finish_at_counter(source, id).await,
            None => None,
        };

        Ok(PlacedOrder {
            local_id,
            source,
            placement: Placement::Confirmed {
                remote_order_id,
                detail,
            },
        })
    }

    /// Fetch the server view of the order, print it and open the drawer.
    /// Best effort: failures are logged.
    async fn finish_at_counter(&self, source: OrderSource, remote_order_id: i64) -> Option<OrderDetailed> {
        let detail = match self.backend.fetch_order(remote_order_id).await {
            Ok(d) => d,
            Err(e) => {
                warn!(remote_order_id, "Could not fetch order for receipt: {e}");
                return None;
            }
        };

        let receipt = ReceiptPayload::from_order(&detail);
        if let Err(e) = self.peripherals.print_receipt(&receipt).await {
            warn!(remote_order_id, device = self.peripherals.name(), "Receipt print failed: {e}");
        }
        // Kiosks take card payments only and have no drawer.
        if source == OrderSource::Pos {
            if let Err(e) = self.peripherals.open_drawer().await {
                warn!(device = self.peripherals.name(), "Drawer open failed: {e}");
            }
        }
        Some(detail)
    }

    /// Fetch the full menu and upsert it into the cache. When the backend is
    /// unreachable the cached snapshot is returned instead.
    pub async fn refresh_menu(&self) -> Result<MenuSnapshot, TerminalError> {
        match self.backend.fetch_menu().await {
            Ok(items) => {
                let written = menu::put_items(&self.db, &items)?;
                info!(received = items.len(), written, "Menu refreshed");
                Ok(MenuSnapshot {
                    items: menu::list_items(&self.db)?,
                    fresh: true,
                })
            }
            Err(e) => {
                warn!("Menu refresh failed, using cached menu: {e}");
                Ok(MenuSnapshot {
                    items: menu::list_items(&self.db)?,
                    fresh: false,
                })
            }
        }
    }

    /// Move a server order to a new status (kitchen display). The status
    /// string is validated before any request is made. A matching local
    /// order is updated too.
    pub async fn update_order_status(&self, remote_order_id: i64, status: &str) -> Result<OrderStatus, TerminalError> {
        let status: OrderStatus = status.parse().map_err(TerminalError::Validation)?;
        self.backend.update_order_status(remote_order_id, status).await?;

        for local in orders::find_where(&self.db, OrderFilter::RemoteOrderId(remote_order_id))? {
            orders::update_order(
                &self.db,
                local.id,
                &OrderPatch {
                    status: Some(status),
                    ..OrderPatch::default()
                },
            )?;
        }
        info!(remote_order_id, status = %status, "Order status updated");
        Ok(status)
    }
}

/// The backend answers 400 for these, which would leave the order unsynced
/// forever.
fn validate_lines(lines: &[OrderLine]) -> Result<(), TerminalError> {
    if lines.is_empty() {
        return Err(TerminalError::Validation("order has no items".into()));
    }
    if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
        return Err(TerminalError::Validation(format!(
            "menu item {} has quantity 0",
            line.menu_item_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::SyncFlag;
    use crate::peripherals::{PeripheralAction, StubPeripherals};
    use crate::sync::SyncEngine;
    use crate::testing::{menu_item, FakeBackend};
    use std::time::Duration;

    struct Fixture {
        db: Arc<DbState>,
        backend: Arc<FakeBackend>,
        peripherals: Arc<StubPeripherals>,
        submitter: OrderSubmitter,
    }

    fn fixture(backend: FakeBackend) -> Fixture {
        let db = Arc::new(DbState::open_in_memory().unwrap());
        let backend = Arc::new(backend);
        let peripherals = Arc::new(StubPeripherals::default());
        let submitter = OrderSubmitter::new(
            Arc::clone(&db),
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&peripherals) as Arc<dyn Peripherals>,
        );
        Fixture {
            db,
            backend,
            peripherals,
            submitter,
        }
    }

    fn ramen_x2() -> Vec<OrderLine> {
        vec![OrderLine {
            menu_item_id: 3,
            quantity: 2,
        }]
    }

    #[tokio::test]
    async fn test_offline_order_is_recorded_and_queued() {
        let f = fixture(FakeBackend::offline());

        let placed = f
            .submitter
            .place_order(OrderSource::Pos, ramen_x2())
            .await
            .unwrap();

        assert!(!placed.is_confirmed());
        assert_eq!(placed.display_id(), placed.local_id);
        let stored = orders::get_order(&f.db, placed.local_id).unwrap().unwrap();
        assert_eq!(stored.synced, SyncFlag::Unsynced);
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.items, ramen_x2());
        assert!(f.peripherals.actions().is_empty());
    }

    #[tokio::test]
    async fn test_online_order_is_confirmed_printed_and_drawer_opened() {
        let f = fixture(FakeBackend::new());

        let placed = f
            .submitter
            .place_order(OrderSource::Pos, ramen_x2())
            .await
            .unwrap();

        assert!(placed.is_confirmed());
        assert_eq!(placed.display_id(), 501);
        let stored = orders::get_order(&f.db, placed.local_id).unwrap().unwrap();
        assert_eq!(stored.synced, SyncFlag::Synced);
        assert_eq!(stored.remote_order_id, Some(501));
        assert_eq!(
            f.peripherals.actions(),
            vec![
                PeripheralAction::ReceiptPrinted { order_id: 501 },
                PeripheralAction::DrawerOpened
            ]
        );
    }

    #[tokio::test]
    async fn test_kiosk_order_does_not_open_drawer() {
        let f = fixture(FakeBackend::new());
        f.submitter
            .place_order(OrderSource::Kiosk, ramen_x2())
            .await
            .unwrap();
        assert_eq!(
            f.peripherals.actions(),
            vec![PeripheralAction::ReceiptPrinted { order_id: 501 }]
        );
    }

    #[tokio::test]
    async fn test_invalid_order_writes_nothing() {
        let f = fixture(FakeBackend::new());

        let empty = f.submitter.place_order(OrderSource::Pos, Vec::new()).await;
        assert!(matches!(empty, Err(TerminalError::Validation(_))));

        let zero = f
            .submitter
            .place_order(
                OrderSource::Kiosk,
                vec![OrderLine {
                    menu_item_id: 3,
                    quantity: 0,
                }],
            )
            .await;
        assert!(matches!(zero, Err(TerminalError::Validation(_))));

        assert!(orders::list_orders(&f.db).unwrap().is_empty());
        assert_eq!(f.backend.created_count(), 0);
    }

    #[tokio::test]
    async fn test_server_rejection_is_queued_not_lost() {
        let f = fixture(FakeBackend::new());
        *f.backend.reject_item.lock().unwrap() = Some(3);

        let placed = f
            .submitter
            .place_order(OrderSource::Pos, ramen_x2())
            .await
            .unwrap();
        match &placed.placement {
            Placement::Queued { reason } => assert!(reason.contains("400"), "{reason}"),
            other => panic!("expected queued, got {other:?}"),
        }
        assert_eq!(orders::pending_sync(&f.db).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_menu_falls_back_to_cache() {
        let f = fixture(FakeBackend::new().with_menu(vec![menu_item(1, 200, None), menu_item(2, 350, None)]));

        let fresh = f.submitter.refresh_menu().await.unwrap();
        assert!(fresh.fresh);
        assert_eq!(fresh.items.len(), 2);

        f.backend.set_online(false);
        let cached = f.submitter.refresh_menu().await.unwrap();
        assert!(!cached.fresh);
        assert_eq!(cached.items, fresh.items);
    }

    #[tokio::test]
    async fn test_refresh_menu_takes_server_copy_over_newer_cache() {
        use chrono::{TimeZone, Utc};
        let at = |hour| Some(Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap());
        let f = fixture(FakeBackend::new().with_menu(vec![menu_item(1, 180, at(6))]));
        menu::put_item(&f.db, &menu_item(1, 250, at(12))).unwrap();

        let snapshot = f.submitter.refresh_menu().await.unwrap();
        assert_eq!(snapshot.items, vec![menu_item(1, 180, at(6))]);
    }

    #[tokio::test]
    async fn test_update_order_status_validates_and_mirrors_locally() {
        let f = fixture(FakeBackend::new());
        let placed = f
            .submitter
            .place_order(OrderSource::Pos, ramen_x2())
            .await
            .unwrap();

        assert!(matches!(
            f.submitter.update_order_status(501, "cancelled").await,
            Err(TerminalError::Validation(_))
        ));
        assert!(f.backend.status_updates.lock().unwrap().is_empty());

        let status = f.submitter.update_order_status(501, "Ready").await.unwrap();
        assert_eq!(status, OrderStatus::Ready);
        assert_eq!(
            *f.backend.status_updates.lock().unwrap(),
            vec![(501, OrderStatus::Ready)]
        );
        let stored = orders::get_order(&f.db, placed.local_id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn test_slow_submission_is_not_pushed_again_by_sync() {
        let f = fixture(FakeBackend::new());
        *f.backend.create_delay.lock().unwrap() = Duration::from_millis(300);
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&f.db),
            Arc::clone(&f.backend) as Arc<dyn Backend>,
            Duration::from_millis(50),
        ));
        let handle = engine.start();

        let placed = f
            .submitter
            .place_order(OrderSource::Pos, ramen_x2())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.stop().await;

        assert!(placed.is_confirmed());
        assert_eq!(f.backend.created_count(), 1);
        assert!(orders::pending_sync(&f.db).unwrap().is_empty());
        assert!(!f.db.is_claimed(placed.local_id));
    }
}
