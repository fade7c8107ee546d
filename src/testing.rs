//! In-process `Backend` used by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::Backend;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CreateOrderRequest, CreateOrderResponse, MenuDelta, MenuItem, OrderDetailed, OrderItemDetailed,
    OrderStatus, RemoteOrder, StatusUpdateAck,
};

pub struct FakeBackend {
    online: AtomicBool,
    next_remote_id: AtomicI64,
    pub menu: Mutex<Vec<MenuItem>>,
    pub since_calls: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub created: Mutex<Vec<(i64, CreateOrderRequest)>>,
    /// Orders containing this menu item are rejected with HTTP 400.
    pub reject_item: Mutex<Option<i64>>,
    pub pull_delay: Mutex<Duration>,
    pub create_delay: Mutex<Duration>,
    pub fail_pull: AtomicBool,
    /// Return the whole menu regardless of `since`.
    pub ignore_since: AtomicBool,
    pub status_updates: Mutex<Vec<(i64, OrderStatus)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            next_remote_id: AtomicI64::new(501),
            menu: Mutex::new(Vec::new()),
            since_calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            reject_item: Mutex::new(None),
            pull_delay: Mutex::new(Duration::ZERO),
            create_delay: Mutex::new(Duration::ZERO),
            fail_pull: AtomicBool::new(false),
            ignore_since: AtomicBool::new(false),
            status_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        let backend = Self::new();
        backend.set_online(false);
        backend
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn with_menu(self, items: Vec<MenuItem>) -> Self {
        *self.menu.lock().unwrap() = items;
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn check_online(&self) -> ApiResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Network("cannot reach backend at http://fake".into()))
        }
    }
}

pub fn menu_item(id: i64, cents: i64, updated_at: Option<DateTime<Utc>>) -> MenuItem {
    MenuItem {
        id,
        name: format!("Item {id}"),
        price: Decimal::new(cents, 2),
        available: true,
        image_url: None,
        updated_at,
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_menu(&self) -> ApiResult<Vec<MenuItem>> {
        self.check_online()?;
        Ok(self.menu.lock().unwrap().clone())
    }

    async fn sync_menu(&self, since: Option<DateTime<Utc>>) -> ApiResult<MenuDelta> {
        let delay = *self.pull_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        self.since_calls.lock().unwrap().push(since);
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                status: 500,
                body: "menu sync failed".into(),
            });
        }
        let since = if self.ignore_since.load(Ordering::SeqCst) {
            None
        } else {
            since
        };
        let menu = self
            .menu
            .lock()
            .unwrap()
            .iter()
            .filter(|it| match (since, it.updated_at) {
                (Some(since), Some(ts)) => ts > since,
                _ => true,
            })
            .cloned()
            .collect();
        Ok(MenuDelta { menu })
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> ApiResult<CreateOrderResponse> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        if let Some(bad) = *self.reject_item.lock().unwrap() {
            if request.items.iter().any(|l| l.menu_item_id == bad) {
                return Err(ApiError::Server {
                    status: 400,
                    body: format!("menu item {bad} not found"),
                });
            }
        }
        let id = self.next_remote_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push((id, request.clone()));
        Ok(CreateOrderResponse {
            order_id: Some(id),
            id: None,
            status: Some("pending".into()),
        })
    }

    async fn fetch_order(&self, remote_order_id: i64) -> ApiResult<OrderDetailed> {
        self.check_online()?;
        let created = self.created.lock().unwrap();
        let (_, request) = created
            .iter()
            .find(|(id, _)| *id == remote_order_id)
            .ok_or_else(|| ApiError::Server {
                status: 404,
                body: "order not found".into(),
            })?;
        Ok(OrderDetailed {
            order: RemoteOrder {
                id: remote_order_id,
                source: request.source.as_str().to_string(),
                status: OrderStatus::Pending,
                created_at: Some(Utc::now()),
                updated_at: None,
            },
            items: request
                .items
                .iter()
                .map(|line| OrderItemDetailed {
                    id: None,
                    order_id: Some(remote_order_id),
                    menu_item_id: line.menu_item_id,
                    quantity: line.quantity,
                    menu_name: format!("Item {}", line.menu_item_id),
                    menu_price: Decimal::new(500, 2),
                    menu_image: None,
                })
                .collect(),
        })
    }

    async fn update_order_status(
        &self,
        remote_order_id: i64,
        status: OrderStatus,
    ) -> ApiResult<StatusUpdateAck> {
        self.check_online()?;
        self.status_updates
            .lock()
            .unwrap()
            .push((remote_order_id, status));
        Ok(StatusUpdateAck {
            order_id: Some(remote_order_id),
            new_status: Some(status.as_str().to_string()),
        })
    }
}
