//! Wire types shared by the store, the API client and the sync engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

/// A menu entry as served by the backend and cached on the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Body of `POST /menu`.
#[derive(Debug, Clone, Serialize)]
pub struct NewMenuItem {
    pub name: String,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuItemCreated {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Reference to an uploaded image asset.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedAsset {
    pub url: String,
}

/// Response of `GET /sync/menu`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuDelta {
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Terminal surface that created an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSource {
    Pos,
    Kiosk,
}

impl OrderSource {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSource::Pos => "pos",
            OrderSource::Kiosk => "kiosk",
        }
    }
}

impl fmt::Display for OrderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pos" => Ok(OrderSource::Pos),
            "kiosk" => Ok(OrderSource::Kiosk),
            other => Err(format!("unknown order source {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "invalid status {s:?}, allowed: pending, preparing, ready, completed"
                )
            })
    }
}

/// One line of an order as submitted to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: i64,
    pub quantity: u32,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOrderRequest {
    pub source: OrderSource,
    pub items: Vec<OrderLine>,
}

/// Response of `POST /orders`. Older backends answer `{id}` instead of
/// `{order_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOrderResponse {
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CreateOrderResponse {
    pub fn remote_id(&self) -> Option<i64> {
        self.order_id.or(self.id)
    }
}

/// Server-side order header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: i64,
    pub source: String,
    pub status: OrderStatus,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Order line with the menu name/price snapshot taken at order time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemDetailed {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    pub menu_item_id: i64,
    pub quantity: u32,
    pub menu_name: String,
    pub menu_price: Decimal,
    #[serde(default)]
    pub menu_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetailed {
    pub order: RemoteOrder,
    #[serde(default)]
    pub items: Vec<OrderItemDetailed>,
}

impl OrderDetailed {
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .map(|it| it.menu_price * Decimal::from(it.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdersDelta {
    #[serde(default)]
    pub orders: Vec<RemoteOrder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdateAck {
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub new_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueToken {
    pub id: i64,
    pub order_id: i64,
    pub token_number: i64,
    pub status: QueueStatus,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Queue tokens split the way the customer-facing board shows them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBoard {
    pub waiting: Vec<QueueToken>,
    pub ready: Vec<QueueToken>,
}

impl QueueBoard {
    /// Partition tokens, each column ordered by token number.
    pub fn from_tokens(tokens: Vec<QueueToken>) -> Self {
        let (mut ready, mut waiting): (Vec<_>, Vec<_>) = tokens
            .into_iter()
            .partition(|t| t.status == QueueStatus::Ready);
        waiting.sort_by_key(|t| t.token_number);
        ready.sort_by_key(|t| t.token_number);
        Self { waiting, ready }
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptItem {
    pub name: String,
    pub qty: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptPayload {
    pub order_id: i64,
    pub items: Vec<ReceiptItem>,
    pub total: Decimal,
}

impl ReceiptPayload {
    pub fn from_order(order: &OrderDetailed) -> Self {
        Self {
            order_id: order.order.id,
            items: order
                .items
                .iter()
                .map(|it| ReceiptItem {
                    name: it.menu_name.clone(),
                    qty: it.quantity,
                    price: it.menu_price,
                })
                .collect(),
            total: order.total(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Timestamp handling shared by the wire types and the store.
///
/// Stored and sent values are RFC3339 UTC with a fixed microsecond width so
/// that text comparison in SQLite orders them chronologically. Incoming
/// values may also be naive (`2026-03-01T10:00:00` or with a space), which
/// are read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(ts) => serializer.serialize_str(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}"))),
            }
        }
    }
}
