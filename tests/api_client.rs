//! REST client against an in-process axum backend.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashmato_terminal::models::{
    CreateOrderRequest, NewMenuItem, OrderLine, OrderSource, OrderStatus, QueueStatus,
};
use hashmato_terminal::{ApiClient, ApiError, Backend, TerminalConfig};

#[derive(Default)]
struct Recorded {
    since: Vec<Option<String>>,
    orders: Vec<Value>,
    statuses: Vec<(i64, Value)>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn sync_menu(
    State(rec): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    rec.lock().unwrap().since.push(q.get("since").cloned());
    Json(json!({
        "menu": [
            { "id": 1, "name": "Ramen", "price": "12.50", "available": true,
              "image_url": "/uploads/ramen.png", "updated_at": "2026-03-01T10:00:00Z" },
            { "id": 2, "name": "Tea", "price": 2, "available": false,
              "updated_at": "2026-03-01 11:00:00" }
        ]
    }))
}

async fn create_order(State(rec): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    rec.lock().unwrap().orders.push(body);
    (StatusCode::CREATED, Json(json!({ "order_id": 501, "status": "pending" })))
}

async fn order_detailed(Path(id): Path<i64>) -> Result<Json<Value>, (StatusCode, String)> {
    if id != 501 {
        return Err((StatusCode::NOT_FOUND, "order not found".into()));
    }
    Ok(Json(json!({
        "order": { "id": 501, "source": "pos", "status": "pending",
                   "created_at": "2026-03-01T10:00:00Z", "updated_at": null },
        "items": [
            { "id": 1, "order_id": 501, "menu_item_id": 1, "quantity": 2,
              "menu_name": "Ramen", "menu_price": "12.50", "menu_image": null }
        ]
    })))
}

async fn update_status(
    State(rec): State<Shared>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let status = body["status"].clone();
    rec.lock().unwrap().statuses.push((id, body));
    Json(json!({ "order_id": id, "new_status": status }))
}

async fn upload(mut multipart: Multipart) -> Result<Json<Value>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("missing").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            return Ok(Json(json!({ "url": format!("/uploads/{name}?size={}", bytes.len()) })));
        }
    }
    Err((StatusCode::BAD_REQUEST, "no file".into()))
}

async fn spawn_backend() -> (String, Shared) {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route(
            "/menu",
            get(|| async { Json(json!([{ "id": 1, "name": "Ramen", "price": 12.5 }])) })
                .post(|Json(body): Json<Value>| async move {
                    (StatusCode::CREATED, Json(json!({ "id": 9, "status": "created", "echo": body })))
                }),
        )
        .route("/menu/upload", post(upload))
        .route("/sync/menu", get(sync_menu))
        .route("/sync/orders", get(|| async { Json(json!({ "orders": [] })) }))
        .route("/orders", post(create_order))
        .route("/orders/detailed", get(|| async { Json(json!([])) }))
        .route("/orders/{id}/detailed", get(order_detailed))
        .route("/orders/{id}/status", put(update_status))
        .route(
            "/queue",
            get(|| async {
                Json(json!([
                    { "id": 1, "order_id": 501, "token_number": 12, "status": "ready" },
                    { "id": 2, "order_id": 502, "token_number": 14, "status": "waiting" },
                    { "id": 3, "order_id": 503, "token_number": 13, "status": "waiting" }
                ]))
            }),
        )
        .with_state(rec.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), rec)
}

fn client(base: &str) -> ApiClient {
    ApiClient::new(&TerminalConfig::new(base).with_request_timeout(Duration::from_secs(2))).unwrap()
}

#[tokio::test]
async fn test_sync_menu_sends_since_and_decodes_prices() {
    let (base, rec) = spawn_backend().await;
    let api = client(&base);

    let full = api.sync_menu(None).await.unwrap();
    assert_eq!(full.menu.len(), 2);
    assert_eq!(full.menu[0].price, Decimal::new(1250, 2));
    assert_eq!(full.menu[1].price, Decimal::from(2));
    assert!(!full.menu[1].available);

    let since = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    api.sync_menu(Some(since)).await.unwrap();

    let recorded = rec.lock().unwrap().since.clone();
    assert_eq!(recorded[0], None);
    assert_eq!(recorded[1].as_deref(), Some("2026-03-01T10:00:00.000000Z"));
}

#[tokio::test]
async fn test_create_order_posts_wire_shape() {
    let (base, rec) = spawn_backend().await;
    let api = client(&base);

    let resp = api
        .create_order(&CreateOrderRequest {
            source: OrderSource::Pos,
            items: vec![OrderLine {
                menu_item_id: 3,
                quantity: 2,
            }],
        })
        .await
        .unwrap();

    assert_eq!(resp.remote_id(), Some(501));
    assert_eq!(
        rec.lock().unwrap().orders[0],
        json!({ "source": "pos", "items": [{ "menu_item_id": 3, "quantity": 2 }] })
    );
}

#[tokio::test]
async fn test_fetch_order_and_missing_order() {
    let (base, _rec) = spawn_backend().await;
    let api = client(&base);

    let detail = api.fetch_order(501).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.total(), Decimal::new(2500, 2));

    let err = api.fetch_order(999).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    match err {
        ApiError::Server { body, .. } => assert_eq!(body, "order not found"),
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_status_and_queue_board() {
    let (base, rec) = spawn_backend().await;
    let api = client(&base);

    let ack = api.update_order_status(501, OrderStatus::Ready).await.unwrap();
    assert_eq!(ack.new_status.as_deref(), Some("ready"));
    assert_eq!(rec.lock().unwrap().statuses[0], (501, json!({ "status": "ready" })));

    let board = api.queue_board().await.unwrap();
    let waiting: Vec<i64> = board.waiting.iter().map(|t| t.token_number).collect();
    assert_eq!(waiting, vec![13, 14]);
    assert_eq!(board.ready[0].status, QueueStatus::Ready);
}

#[tokio::test]
async fn test_menu_admin_calls() {
    let (base, _rec) = spawn_backend().await;
    let api = client(&base);

    let menu = api.fetch_menu().await.unwrap();
    assert_eq!(menu.len(), 1);
    assert!(menu[0].available);

    let created = api
        .create_menu_item(&NewMenuItem {
            name: "Gyoza".into(),
            price: Decimal::new(650, 2),
            image_url: None,
        })
        .await
        .unwrap();
    assert_eq!(created.id, 9);

    let named = api.upload_image(Some("gyoza.png"), vec![1, 2, 3]).await.unwrap();
    assert_eq!(named.url, "/uploads/gyoza.png?size=3");

    let unnamed = api.upload_image(None, vec![7]).await.unwrap();
    assert!(unnamed.url.starts_with("/uploads/upload-"), "{}", unnamed.url);

    assert!(api.list_orders_detailed().await.unwrap().is_empty());
    assert!(api.sync_orders(None).await.unwrap().orders.is_empty());
}

#[tokio::test]
async fn test_non_json_success_body_is_parse_error() {
    let app = Router::new().route("/menu", get(|| async { "<html>maintenance</html>" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let err = client(&format!("http://{addr}")).fetch_menu().await.unwrap_err();
    assert!(matches!(err, ApiError::Parse(_)), "{err:?}");
}

#[tokio::test]
async fn test_server_error_keeps_body() {
    let app = Router::new().route(
        "/orders",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "db down") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let err = client(&format!("http://{addr}"))
        .create_order(&CreateOrderRequest {
            source: OrderSource::Kiosk,
            items: vec![OrderLine {
                menu_item_id: 1,
                quantity: 1,
            }],
        })
        .await
        .unwrap_err();
    assert!(!err.is_network());
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("db down"));
}
