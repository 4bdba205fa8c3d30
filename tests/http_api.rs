use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storefront::catalog::{Product, ProductId};
use storefront::order::{InMemoryOrderSink, OrderReceipt, OrderRecord, OrderSink, SinkError};
use storefront::{AppState, InMemoryCatalog, Money, ServerConfig, app};
use tower::ServiceExt;

struct TestApp {
    router: Router,
}

impl TestApp {
    fn with_catalog(catalog: InMemoryCatalog, config: ServerConfig) -> Self {
        let state = AppState::new(catalog, &config);
        Self {
            router: app(state, &config),
        }
    }

    fn seeded(enable_admin: bool) -> Self {
        Self::with_catalog(fixture_catalog(), ServerConfig {
            enable_admin,
            ..ServerConfig::default()
        })
    }

    /// Seeded app whose checkout hands orders to `sink`, one attempt each.
    fn with_sink(sink: Arc<dyn OrderSink>, orders: Arc<InMemoryOrderSink>) -> Self {
        let config = ServerConfig {
            checkout_timeout: Duration::from_millis(100),
            checkout_max_attempts: 1,
            ..ServerConfig::default()
        };
        let state = AppState::with_order_sink(fixture_catalog(), &config, sink, orders);
        Self {
            router: app(state, &config),
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    async fn open_session(&self) -> String {
        let (status, body) = self.send(Method::POST, "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().expect("session id").to_string()
    }

    async fn add(&self, session: &str, product: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/sessions/{session}/cart/items"),
            Some(json!({ "product_id": product })),
        )
        .await
    }
}

fn fixture_catalog() -> InMemoryCatalog {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/catalog.yaml");
    InMemoryCatalog::load(&path).expect("fixture catalog loads")
}

/// Fails every submission with the same error.
struct FailingSink(SinkError);

#[async_trait]
impl OrderSink for FailingSink {
    async fn submit(&self, _order: &OrderRecord) -> Result<OrderReceipt, SinkError> {
        Err(self.0.clone())
    }
}

/// Never answers.
struct StalledSink;

#[async_trait]
impl OrderSink for StalledSink {
    async fn submit(&self, _order: &OrderRecord) -> Result<OrderReceipt, SinkError> {
        std::future::pending::<Result<OrderReceipt, SinkError>>().await
    }
}

/// Accepts orders into `book` after a delay.
struct SlowSink {
    book: Arc<InMemoryOrderSink>,
    delay: Duration,
}

#[async_trait]
impl OrderSink for SlowSink {
    async fn submit(&self, order: &OrderRecord) -> Result<OrderReceipt, SinkError> {
        tokio::time::sleep(self.delay).await;
        self.book.submit(order).await
    }
}

fn money(value: &Value) -> Money {
    serde_json::from_value(value.clone()).expect("money value")
}

fn valid_form() -> Value {
    json!({
        "customer_name": "Asha Verma",
        "email": "asha@example.com",
        "phone": "9876543210",
        "address": "12 Residency Road, Bengaluru",
        "transaction_id": "UPI-88231"
    })
}

fn product(id: &str, price: &str) -> Product {
    Product::new(
        ProductId::new(id).unwrap(),
        format!("Product {id}"),
        Money::parse(price).unwrap(),
    )
}

#[tokio::test]
async fn cart_scenario_over_http() {
    let app = TestApp::with_catalog(
        InMemoryCatalog::from_products([product("a", "100"), product("b", "50")]),
        ServerConfig::default(),
    );
    let session = app.open_session().await;

    app.add(&session, "a").await;
    app.add(&session, "b").await;
    let (status, cart) = app.add(&session, "a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["item_count"], 3);
    assert_eq!(money(&cart["total"]), Money::parse("250").unwrap());
    assert_eq!(cart["items"][0]["product_id"], "a");
    assert_eq!(cart["items"][0]["quantity"], 2);
    assert_eq!(cart["items"][1]["product_id"], "b");
    assert_eq!(cart["items"][1]["quantity"], 1);

    let (status, cart) = app
        .send(
            Method::PUT,
            &format!("/sessions/{session}/cart/items/b"),
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["item_count"], 2);
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(money(&cart["total"]), Money::parse("200").unwrap());

    let (status, cart) = app
        .send(Method::DELETE, &format!("/sessions/{session}/cart"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["item_count"], 0);
    assert_eq!(cart["state"], "empty");
    assert!(money(&cart["total"]).is_zero());
}

#[tokio::test]
async fn sessions_are_isolated() {
    let app = TestApp::seeded(false);
    let first = app.open_session().await;
    let second = app.open_session().await;

    app.add(&first, "cable-anker-usbc").await;

    let (_, cart) = app
        .send(Method::GET, &format!("/sessions/{second}/cart"), None)
        .await;
    assert_eq!(cart["item_count"], 0);

    let (status, _) = app
        .send(Method::DELETE, &format!("/sessions/{first}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app
        .send(Method::GET, &format!("/sessions/{first}/cart"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = TestApp::seeded(false);

    let (status, _) = app
        .send(Method::GET, "/sessions/not-a-session/cart", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let session = app.open_session().await;
    let (status, body) = app.add(&session, "does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "product_not_found");
    assert_eq!(body["category"], "resource_not_found");

    let (status, _) = app.send(Method::GET, "/products/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn removing_absent_line_changes_nothing() {
    let app = TestApp::seeded(false);
    let session = app.open_session().await;
    let (_, before) = app.add(&session, "sp-iphone-15").await;

    let (status, after) = app
        .send(
            Method::DELETE,
            &format!("/sessions/{session}/cart/items/case-iphone-15"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before, after);
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = TestApp::seeded(false);
    let session = app.open_session().await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/sessions/{session}/cart/items"),
            Some(json!({ "sku": "cable-anker-usbc" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn product_listing_filters() {
    let app = TestApp::seeded(false);

    let (status, all) = app.send(Method::GET, "/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 7);

    let (_, anker) = app.send(Method::GET, "/products?brand=Anker", None).await;
    let ids: Vec<&str> = anker
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["charger-anker-pd", "cable-anker-usbc"]);

    let (_, iphone) = app.send(Method::GET, "/products?q=iphone", None).await;
    assert_eq!(iphone.as_array().unwrap().len(), 2);

    let (_, product) = app.send(Method::GET, "/products/sp-iphone-15", None).await;
    assert_eq!(product["type"], "Screen Protector");
}

#[tokio::test]
async fn checkout_rejects_empty_cart_and_bad_form() {
    let app = TestApp::seeded(true);
    let session = app.open_session().await;
    let checkout = format!("/sessions/{session}/checkout");

    let (status, body) = app
        .send(Method::POST, &checkout, Some(valid_form()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "empty_cart");

    app.add(&session, "charger-anker-pd").await;
    let mut form = valid_form();
    form["email"] = json!("not-an-email");
    form["phone"] = json!("123");
    let (status, body) = app.send(Method::POST, &checkout, Some(form)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f.as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"phone"));

    // failed checkout leaves the cart alone
    let (_, cart) = app
        .send(Method::GET, &format!("/sessions/{session}/cart"), None)
        .await;
    assert_eq!(cart["item_count"], 1);

    let (_, orders) = app.send(Method::GET, "/admin/orders", None).await;
    assert!(orders.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn checkout_places_order_and_clears_cart() {
    let app = TestApp::seeded(true);
    let session = app.open_session().await;
    app.add(&session, "case-iphone-15").await;
    app.add(&session, "case-iphone-15").await;
    app.add(&session, "cable-anker-usbc").await;

    let (status, confirmation) = app
        .send(
            Method::POST,
            &format!("/sessions/{session}/checkout"),
            Some(valid_form()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order = &confirmation["order"];
    assert_eq!(order["status"], "Processing");
    assert_eq!(order["lines"].as_array().unwrap().len(), 2);
    assert_eq!(order["lines"][0]["quantity"], 2);
    assert_eq!(money(&order["total"]), Money::parse("5479.00").unwrap());
    assert_eq!(confirmation["receipt"]["order_id"], order["id"]);

    let (_, cart) = app
        .send(Method::GET, &format!("/sessions/{session}/cart"), None)
        .await;
    assert_eq!(cart["item_count"], 0);

    let (_, orders) = app.send(Method::GET, "/admin/orders", None).await;
    assert_eq!(orders.as_array().unwrap().len(), 1);
    assert_eq!(orders[0]["id"], order["id"]);
}

#[tokio::test]
async fn checkout_form_is_prefilled_from_identity_headers() {
    let app = TestApp::seeded(false);
    let session = app.open_session().await;

    let request = Request::builder()
        .uri(format!("/sessions/{session}/checkout"))
        .header("x-user-name", "Asha Verma")
        .header("x-user-email", "asha@example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let form: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(form["customer_name"], "Asha Verma");
    assert_eq!(form["email"], "asha@example.com");
    assert_eq!(form["phone"], "");
}

#[tokio::test]
async fn admin_routes_are_hidden_unless_enabled() {
    let app = TestApp::seeded(false);
    let (status, _) = app.send(Method::GET, "/admin/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_order_status_transitions() {
    let app = TestApp::seeded(true);
    let session = app.open_session().await;
    app.add(&session, "phone-nothing-2a").await;
    let (_, confirmation) = app
        .send(
            Method::POST,
            &format!("/sessions/{session}/checkout"),
            Some(valid_form()),
        )
        .await;
    let order_uri = format!(
        "/admin/orders/{}",
        confirmation["order"]["id"].as_str().unwrap()
    );

    let (status, order) = app
        .send(Method::PATCH, &order_uri, Some(json!({ "status": "Shipped" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "Shipped");

    let (status, body) = app
        .send(
            Method::PATCH,
            &order_uri,
            Some(json!({ "status": "Processing" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");

    let (status, _) = app
        .send(
            Method::PATCH,
            "/admin/orders/ord_missing",
            Some(json!({ "status": "Shipped" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_product_upsert_and_delete() {
    let app = TestApp::seeded(true);
    let draft = json!({
        "name": "Anker MagGo Power Bank",
        "description": "Magnetic 10,000 mAh battery with a smart display.",
        "price": "5999.00",
        "image": "https://images.example.com/products/anker-maggo.jpg",
        "brand": "Anker",
        "type": "Charger",
        "features": ["Qi2 certified"]
    });

    let (status, created) = app
        .send(Method::PUT, "/admin/products/anker-maggo", Some(draft.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "anker-maggo");

    let (status, _) = app
        .send(Method::PUT, "/admin/products/anker-maggo", Some(draft))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            Method::PUT,
            "/admin/products/bad",
            Some(json!({
                "name": "B",
                "description": "short",
                "price": "0",
                "image": "ftp://nope",
                "brand": "Generic",
                "type": "Case"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = app
        .send(Method::DELETE, "/admin/products/anker-maggo", None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .send(Method::GET, "/products/anker-maggo", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn probes_and_metrics() {
    let app = TestApp::seeded(false);

    let (status, health) = app.send(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, ready) = app.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["components"]["catalog"]["details"]["products"], 7);

    let session = app.open_session().await;
    app.add(&session, "cable-anker-usbc").await;
    let (status, text) = app.send(Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.as_str().unwrap().contains("storefront_cart_mutations_total"));
}

#[tokio::test]
async fn empty_catalog_is_not_ready() {
    let app = TestApp::with_catalog(InMemoryCatalog::new(), ServerConfig::default());
    let (status, ready) = app.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ready["ready"], false);
}

#[tokio::test]
async fn product_filters_ignore_case_and_report_bad_values() {
    let app = TestApp::seeded(false);

    let (status, apple) = app.send(Method::GET, "/products?brand=apple", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(apple.as_array().unwrap().len(), 1);
    assert_eq!(apple[0]["id"], "case-iphone-15");

    let (status, protectors) = app
        .send(Method::GET, "/products?kind=screen-protector", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(protectors.as_array().unwrap().len(), 1);
    assert_eq!(protectors[0]["id"], "sp-iphone-15");

    let (status, body) = app.send(Method::GET, "/products?brand=Acme", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(body["category"], "client_error");
}

async fn checkout_with_sink(sink: Arc<dyn OrderSink>) -> (StatusCode, Value, Value) {
    let orders = Arc::new(InMemoryOrderSink::new());
    let app = TestApp::with_sink(sink, orders.clone());
    let session = app.open_session().await;
    app.add(&session, "charger-anker-pd").await;
    app.add(&session, "cable-anker-usbc").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/sessions/{session}/checkout"),
            Some(valid_form()),
        )
        .await;
    let (_, cart) = app
        .send(Method::GET, &format!("/sessions/{session}/cart"), None)
        .await;
    assert!(orders.is_empty());
    (status, body, cart)
}

#[tokio::test]
async fn rejected_hand_off_is_bad_gateway_and_keeps_cart() {
    let (status, body, cart) =
        checkout_with_sink(Arc::new(FailingSink(SinkError::Rejected("fraud check".into()))))
            .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "hand_off_rejected");
    assert_eq!(body["retryable"], false);
    assert_eq!(cart["item_count"], 2);
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unavailable_sink_is_bad_gateway_and_retryable() {
    let (status, body, cart) =
        checkout_with_sink(Arc::new(FailingSink(SinkError::Unavailable("db down".into()))))
            .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "hand_off_unavailable");
    assert_eq!(body["retryable"], true);
    assert_eq!(cart["item_count"], 2);
}

#[tokio::test]
async fn stalled_sink_times_out_and_keeps_cart() {
    let (status, body, cart) = checkout_with_sink(Arc::new(StalledSink)).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "hand_off_timeout");
    assert_eq!(body["category"], "timeout");
    assert_eq!(cart["item_count"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_checkouts_place_one_order() {
    let orders = Arc::new(InMemoryOrderSink::new());
    let sink = Arc::new(SlowSink {
        book: orders.clone(),
        delay: Duration::from_millis(50),
    });
    let app = Arc::new(TestApp::with_sink(sink, orders.clone()));
    let session = app.open_session().await;
    app.add(&session, "phone-nothing-2a").await;

    let uri = format!("/sessions/{session}/checkout");
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let app = app.clone();
            let uri = uri.clone();
            tokio::spawn(async move { app.send(Method::POST, &uri, Some(valid_form())).await })
        })
        .collect();

    let mut statuses = Vec::new();
    for attempt in attempts {
        let (status, _) = attempt.await.unwrap();
        statuses.push(status.as_u16());
    }
    statuses.sort();
    assert_eq!(statuses, [201, 409]);
    assert_eq!(orders.len(), 1);
}
