//! Backend REST API client.
//!
//! Stateless wrapper over the menu/order/queue/sync endpoints. Every call is
//! an independent request bounded by the configured timeout (10 s by
//! default). Failures are reported as `ApiError::Network` (unreachable or
//! timed out) or `ApiError::Server` (non-2xx status, body preserved).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TerminalConfig;
use crate::error::{ApiError, ApiResult, ParseError};
use crate::models::{
    timestamp, CreateOrderRequest, CreateOrderResponse, MenuDelta, MenuItem, MenuItemCreated,
    NewMenuItem, OrderDetailed, OrderStatus, OrdersDelta, QueueBoard, QueueToken, StatusUpdate,
    StatusUpdateAck, UploadedAsset,
};

/// The calls the sync engine and the submission flow depend on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /menu`
    async fn fetch_menu(&self) -> ApiResult<Vec<MenuItem>>;

    /// `GET /sync/menu[?since=...]`
    async fn sync_menu(&self, since: Option<DateTime<Utc>>) -> ApiResult<MenuDelta>;

    /// `POST /orders`
    async fn create_order(&self, request: &CreateOrderRequest) -> ApiResult<CreateOrderResponse>;

    /// `GET /orders/:id/detailed`
    async fn fetch_order(&self, remote_order_id: i64) -> ApiResult<OrderDetailed>;

    /// `PUT /orders/:id/status`
    async fn update_order_status(
        &self,
        remote_order_id: i64,
        status: OrderStatus,
    ) -> ApiResult<StatusUpdateAck>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn network_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_builder() {
        return ApiError::InvalidRequest(format!("invalid backend URL {url}: {err}"));
    }
    if err.is_timeout() {
        return ApiError::Network(format!("connection to {url} timed out"));
    }
    if err.is_connect() {
        return ApiError::Network(format!("cannot reach backend at {url}"));
    }
    ApiError::Network(format!("network error communicating with {url}: {err}"))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: String,
}

impl ApiClient {
    pub fn new(config: &TerminalConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: config.api_base.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, req: RequestBuilder) -> ApiResult<T> {
        let url = self.url(path);
        let resp = req.send().await.map_err(|e| network_error(&url, &e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| network_error(&url, &e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), path, "Backend returned error status");
            return Err(ApiError::Server {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        debug!(status = status.as_u16(), path, bytes = body.len(), "Backend response");
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| ApiError::Parse(ParseError::from(e)))
    }

    /// `POST /menu`
    pub async fn create_menu_item(&self, item: &NewMenuItem) -> ApiResult<MenuItemCreated> {
        if item.name.trim().is_empty() {
            return Err(ApiError::InvalidRequest("menu item name is required".into()));
        }
        if item.price.is_sign_negative() {
            return Err(ApiError::InvalidRequest("menu item price cannot be negative".into()));
        }
        let path = "/menu";
        self.send(path, self.client.post(self.url(path)).json(item)).await
    }

    /// `POST /menu/upload` as multipart field `file`.
    pub async fn upload_image(&self, file_name: Option<&str>, bytes: Vec<u8>) -> ApiResult<UploadedAsset> {
        if bytes.is_empty() {
            return Err(ApiError::InvalidRequest("image upload is empty".into()));
        }
        let file_name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("upload-{}", Uuid::new_v4()));
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let path = "/menu/upload";
        self.send(path, self.client.post(self.url(path)).multipart(form)).await
    }

    /// `GET /orders/detailed`
    pub async fn list_orders_detailed(&self) -> ApiResult<Vec<OrderDetailed>> {
        let path = "/orders/detailed";
        self.send(path, self.client.get(self.url(path))).await
    }

    /// `GET /queue`
    pub async fn list_queue(&self) -> ApiResult<Vec<QueueToken>> {
        let path = "/queue";
        self.send(path, self.client.get(self.url(path))).await
    }

    /// Queue tokens split into waiting/ready columns.
    pub async fn queue_board(&self) -> ApiResult<QueueBoard> {
        Ok(QueueBoard::from_tokens(self.list_queue().await?))
    }

    /// `GET /sync/orders[?since=...]`
    pub async fn sync_orders(&self, since: Option<DateTime<Utc>>) -> ApiResult<OrdersDelta> {
        let path = "/sync/orders";
        self.send(path, with_since(self.client.get(self.url(path)), since))
            .await
    }
}

fn with_since(req: RequestBuilder, since: Option<DateTime<Utc>>) -> RequestBuilder {
    match since {
        Some(ts) => req.query(&[("since", timestamp::format(&ts))]),
        None => req,
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn fetch_menu(&self) -> ApiResult<Vec<MenuItem>> {
        let path = "/menu";
        self.send(path, self.client.get(self.url(path))).await
    }

    async fn sync_menu(&self, since: Option<DateTime<Utc>>) -> ApiResult<MenuDelta> {
        let path = "/sync/menu";
        self.send(path, with_since(self.client.get(self.url(path)), since))
            .await
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> ApiResult<CreateOrderResponse> {
        let path = "/orders";
        self.send(path, self.client.post(self.url(path)).json(request))
            .await
    }

    async fn fetch_order(&self, remote_order_id: i64) -> ApiResult<OrderDetailed> {
        let path = format!("/orders/{remote_order_id}/detailed");
        self.send(&path, self.client.get(self.url(&path))).await
    }

    async fn update_order_status(
        &self,
        remote_order_id: i64,
        status: OrderStatus,
    ) -> ApiResult<StatusUpdateAck> {
        let path = format!("/orders/{remote_order_id}/status");
        self.send(&path, self.client.put(self.url(&path)).json(&StatusUpdate { status }))
            .await
    }
}
