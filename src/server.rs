//! HTTP surface: catalog browsing, per-session carts, checkout and the
//! optional admin routes.

use crate::cart::{CartLine, CartState, CartStore};
use crate::catalog::{
    InMemoryCatalog, Product, ProductDraft, ProductFilter, ProductId, ProductRepository,
};
use crate::checkout::{Checkout, CheckoutError, HandOffError, PlacedOrder};
use crate::config::ServerConfig;
use crate::error::{ApiError, ErrorCode};
use crate::logging::{checkout_span, session_span};
use crate::money::Money;
use crate::order::{
    CheckoutForm, Identity, InMemoryOrderSink, OrderId, OrderReceipt, OrderRecord, OrderSink,
    OrderStatus, SinkError, StatusChangeError,
};
use crate::session::{SessionId, SessionRegistry, SharedCart};
use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, Path, Query, Request, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, info};

/// Header carrying the signed-in user's display name, set by the identity proxy
pub const USER_NAME_HEADER: &str = "x-user-name";
/// Header carrying the signed-in user's email, set by the identity proxy
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<InMemoryCatalog>,
    pub sessions: Arc<SessionRegistry>,
    /// Order book behind the admin routes
    pub orders: Arc<InMemoryOrderSink>,
    pub checkout: Checkout,
}

impl AppState {
    /// State whose checkout hands orders to the in-memory order book.
    pub fn new(catalog: InMemoryCatalog, config: &ServerConfig) -> Self {
        let orders = Arc::new(InMemoryOrderSink::new());
        Self::with_order_sink(catalog, config, orders.clone(), orders)
    }

    /// State whose checkout hands orders to `sink`. `orders` is the book the
    /// admin routes read and update.
    pub fn with_order_sink(
        catalog: InMemoryCatalog,
        config: &ServerConfig,
        sink: Arc<dyn OrderSink>,
        orders: Arc<InMemoryOrderSink>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            sessions: Arc::new(SessionRegistry::new(config.mirror_dir.clone())),
            checkout: Checkout::new(sink, config.checkout()),
            orders,
        }
    }

    fn cart(&self, raw_id: &str) -> Result<(SessionId, SharedCart), ApiError> {
        let id: SessionId = raw_id
            .parse()
            .map_err(|_| ApiError::session_not_found(raw_id))?;
        let cart = self
            .sessions
            .get(&id)
            .ok_or_else(|| ApiError::session_not_found(id))?;
        Ok((id, cart))
    }
}

/// Storefront routes; the admin routes are only mounted when `enable_admin`
/// is set.
pub fn router(state: AppState, enable_admin: bool) -> Router {
    let mut router = Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", axum::routing::delete(end_session))
        .route("/sessions/{id}/cart", get(view_cart).delete(clear_cart))
        .route("/sessions/{id}/cart/items", post(add_item))
        .route(
            "/sessions/{id}/cart/items/{product_id}",
            put(set_quantity).delete(remove_item),
        )
        .route("/sessions/{id}/checkout", get(checkout_form).post(place_order));

    if enable_admin {
        router = router
            .route("/admin/orders", get(list_orders))
            .route("/admin/orders/{id}", get(get_order).patch(update_order_status))
            .route(
                "/admin/products/{id}",
                put(upsert_product).delete(delete_product),
            );
    }

    router.with_state(state)
}

// ============================================================================
// Bodies
// ============================================================================

/// JSON body extractor whose rejections use the API error shape.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::new(ErrorCode::InvalidRequest, rejection.body_text())
}

/// Query string extractor whose rejections use the API error shape.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::new(ErrorCode::InvalidRequest, rejection.body_text())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub item_count: u64,
    pub total: Money,
    pub state: CartState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartLineView {
    pub product_id: ProductId,
    pub name: String,
    pub image: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
}

impl From<&CartLine> for CartLineView {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product.id.clone(),
            name: line.product.name.clone(),
            image: line.product.image.clone(),
            unit_price: line.product.price,
            quantity: line.quantity,
            line_total: line.line_total(),
        }
    }
}

impl From<&CartStore> for CartView {
    fn from(cart: &CartStore) -> Self {
        Self {
            items: cart.lines().map(CartLineView::from).collect(),
            item_count: cart.item_count(),
            total: cart.cart_total(),
            state: cart.state(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order: OrderRecord,
    pub receipt: OrderReceipt,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: OrderStatus,
}

fn identity(headers: &HeaderMap) -> Identity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Identity {
        display_name: header(USER_NAME_HEADER),
        email: header(USER_EMAIL_HEADER),
    }
}

fn product_id(raw: &str) -> Result<ProductId, ApiError> {
    ProductId::new(raw).map_err(ApiError::from)
}

// ============================================================================
// Catalog
// ============================================================================

async fn list_products(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<ProductFilter>,
) -> Json<Vec<Product>> {
    Json(state.catalog.list(&filter))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let id = product_id(&id)?;
    state
        .catalog
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::product_not_found(&id))
}

// ============================================================================
// Sessions and carts
// ============================================================================

async fn open_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.open();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session: SessionId = id.parse().map_err(|_| ApiError::session_not_found(&id))?;
    if state.sessions.end(&session) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::session_not_found(session))
    }
}

async fn view_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CartView>, ApiError> {
    let (_, cart) = state.cart(&id)?;
    let cart = cart.lock().await;
    Ok(Json(CartView::from(&*cart)))
}

async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<AddItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    let (session, cart) = state.cart(&id)?;
    let product = state
        .catalog
        .get(&request.product_id)
        .ok_or_else(|| ApiError::product_not_found(&request.product_id))?;

    let mut cart = cart.lock().await;
    let _span = session_span(&session.to_string(), "add_item").entered();
    cart.add_item(product);
    Ok(Json(CartView::from(&*cart)))
}

async fn set_quantity(
    State(state): State<AppState>,
    Path((id, product)): Path<(String, String)>,
    ApiJson(request): ApiJson<SetQuantityRequest>,
) -> Result<Json<CartView>, ApiError> {
    let (session, cart) = state.cart(&id)?;
    let product = product_id(&product)?;

    let mut cart = cart.lock().await;
    let _span = session_span(&session.to_string(), "set_quantity").entered();
    cart.set_quantity(&product, request.quantity);
    Ok(Json(CartView::from(&*cart)))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((id, product)): Path<(String, String)>,
) -> Result<Json<CartView>, ApiError> {
    let (session, cart) = state.cart(&id)?;
    let product = product_id(&product)?;

    let mut cart = cart.lock().await;
    let _span = session_span(&session.to_string(), "remove_item").entered();
    cart.remove_item(&product);
    Ok(Json(CartView::from(&*cart)))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CartView>, ApiError> {
    let (session, cart) = state.cart(&id)?;

    let mut cart = cart.lock().await;
    let _span = session_span(&session.to_string(), "clear").entered();
    cart.clear();
    Ok(Json(CartView::from(&*cart)))
}

// ============================================================================
// Checkout
// ============================================================================

/// Blank checkout form with contact fields prefilled from the identity headers.
async fn checkout_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CheckoutForm>, ApiError> {
    state.cart(&id)?;
    Ok(Json(CheckoutForm::prefilled(&identity(&headers))))
}

async fn place_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(form): ApiJson<CheckoutForm>,
) -> Result<(StatusCode, Json<OrderConfirmation>), ApiError> {
    let (session, cart) = state.cart(&id)?;
    let form = form.with_identity(&identity(&headers));
    let confirmation = checkout_cart(&state.checkout, &cart, &form)
        .instrument(checkout_span(&session.to_string()))
        .await?;
    Ok((StatusCode::CREATED, Json(confirmation)))
}

// The cart stays locked until the sink answered. A second checkout on the
// same session waits and then finds the cart empty.
async fn checkout_cart(
    checkout: &Checkout,
    cart: &SharedCart,
    form: &CheckoutForm,
) -> Result<OrderConfirmation, ApiError> {
    let mut cart = cart.lock().await;
    let PlacedOrder { order, receipt } = checkout.place_order(&mut cart, form).await?;

    info!(order_id = %order.id, "checkout complete, cart cleared");
    Ok(OrderConfirmation { order, receipt })
}

impl From<CheckoutError> for ApiError {
    fn from(error: CheckoutError) -> Self {
        match error {
            CheckoutError::EmptyCart => ApiError::new(ErrorCode::EmptyCart, error.to_string()),
            CheckoutError::Validation(errors) => errors.into(),
            CheckoutError::HandOff(HandOffError::Timeout(_)) => {
                ApiError::new(ErrorCode::HandOffTimeout, error.to_string())
            }
            CheckoutError::HandOff(HandOffError::Sink(SinkError::Rejected(_))) => {
                ApiError::new(ErrorCode::HandOffRejected, error.to_string())
            }
            CheckoutError::HandOff(HandOffError::Sink(SinkError::Unavailable(_))) => {
                ApiError::new(ErrorCode::HandOffUnavailable, error.to_string())
            }
        }
    }
}

// ============================================================================
// Admin
// ============================================================================

async fn list_orders(State(state): State<AppState>) -> Json<Vec<OrderRecord>> {
    Json(state.orders.list())
}

fn order_id(raw: &str) -> Result<OrderId, ApiError> {
    OrderId::new(raw).map_err(ApiError::from)
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let id = order_id(&id)?;
    state
        .orders
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::order_not_found(&id))
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<StatusChangeRequest>,
) -> Result<Json<OrderRecord>, ApiError> {
    let id = order_id(&id)?;
    let order = state.orders.update_status(&id, request.status)?;
    Ok(Json(order))
}

impl From<StatusChangeError> for ApiError {
    fn from(error: StatusChangeError) -> Self {
        match error {
            StatusChangeError::NotFound(id) => ApiError::order_not_found(id),
            StatusChangeError::InvalidTransition { .. } => {
                ApiError::new(ErrorCode::InvalidTransition, error.to_string())
            }
        }
    }
}

async fn upsert_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(draft): ApiJson<ProductDraft>,
) -> Result<Response, ApiError> {
    let id = product_id(&id)?;
    let existing = state.catalog.get(&id);
    let product = draft.into_product(id, existing.as_ref())?;
    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    debug!(product_id = %product.id, created = existing.is_none(), "admin product upsert");
    state.catalog.upsert(product.clone());
    Ok((status, Json(product)).into_response())
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = product_id(&id)?;
    match state.catalog.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::product_not_found(&id)),
    }
}
