//! Integration tests for the Varketplace cart.
//!
//! Tests run the real [`HttpCartService`](varketplace_cart::HttpCartService)
//! and synchronizer against [`FakeCartBackend`], an in-process axum server
//! that speaks the cart API, records every request and can be told to fail.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p varketplace-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `http_service` - wire format, headers and status mapping
//! - `guest_cart` - file-backed guest carts
//! - `authenticated_cart` - server-backed carts and fallback
//! - `merge_on_login` - auth transitions end to end

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use varketplace_cart::{
    ApiConfig, AuthState, CartSynchronizer, HttpCartService, KeyValueStore, LocalCart,
    StorageConfig,
};

/// Cart API endpoints, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    FetchCart,
    AddItem,
    UpdateItem,
    RemoveItem,
    ClearCart,
}

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct Line {
    id: i64,
    product_id: i64,
    quantity: i64,
}

#[derive(Debug, Default)]
struct BackendState {
    /// Cart lines per bearer token.
    carts: HashMap<String, Vec<Line>>,
    catalog: HashMap<i64, Value>,
    next_line_id: i64,
    failing: HashSet<Endpoint>,
    rate_limited: bool,
    rejected_tokens: HashSet<String>,
    rejected_products: HashSet<i64>,
    wrap_responses: bool,
    camel_case_product_id: bool,
    requests: Vec<RecordedRequest>,
}

type Shared = Arc<Mutex<BackendState>>;

/// In-process cart API server on an ephemeral port.
///
/// The server is stopped when the value is dropped.
pub struct FakeCartBackend {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl FakeCartBackend {
    /// Bind to `127.0.0.1:0` and start serving.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let state: Shared = Arc::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Fake cart backend stopped: {e}");
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// Base URL to configure the client with.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Synchronizer talking to this backend over HTTP, with its local
    /// mirror in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is rejected or the HTTP client cannot
    /// be built.
    pub fn synchronizer(
        &self,
        store: Arc<dyn KeyValueStore>,
        auth: AuthState,
    ) -> Result<CartSynchronizer<HttpCartService>, Box<dyn std::error::Error + Send + Sync>> {
        let api = ApiConfig::new(&self.api_base())?;
        let local = LocalCart::new(store, &StorageConfig::default());
        Ok(CartSynchronizer::new(HttpCartService::new(&api)?, local, auth))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BackendState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Make product `id` known, so cart lines carry a name and price.
    pub fn add_product(&self, id: i64, name: &str, price: &str) {
        self.with_state(|s| {
            s.catalog
                .insert(id, json!({ "id": id, "name": name, "price": price }));
        });
    }

    /// Put a line straight into the cart of `token`, returning its line ID.
    pub fn seed_line(&self, token: &str, product_id: i64, quantity: i64) -> i64 {
        self.with_state(|s| {
            s.next_line_id += 1;
            let id = s.next_line_id;
            s.carts.entry(token.to_string()).or_default().push(Line {
                id,
                product_id,
                quantity,
            });
            id
        })
    }

    /// Answer `endpoint` with HTTP 500 until further notice.
    pub fn fail(&self, endpoint: Endpoint) {
        self.with_state(|s| s.failing.insert(endpoint));
    }

    /// Stop failing every endpoint.
    pub fn recover(&self) {
        self.with_state(|s| {
            s.failing.clear();
            s.rate_limited = false;
        });
    }

    /// Answer every request with HTTP 429 and `Retry-After: 7`.
    pub fn rate_limit(&self) {
        self.with_state(|s| s.rate_limited = true);
    }

    /// Answer requests bearing `token` with HTTP 401.
    pub fn reject_token(&self, token: &str) {
        self.with_state(|s| s.rejected_tokens.insert(token.to_string()));
    }

    /// Answer adds of `product_id` with HTTP 422.
    pub fn reject_product(&self, product_id: i64) {
        self.with_state(|s| s.rejected_products.insert(product_id));
    }

    /// Wrap cart responses as `{ "data": cart, "message": "ok" }`.
    pub fn wrap_responses(&self) {
        self.with_state(|s| s.wrap_responses = true);
    }

    /// Send `productId` instead of `product_id` on cart lines.
    pub fn camel_case_product_id(&self) {
        self.with_state(|s| s.camel_case_product_id = true);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_state(|s| s.requests.clone())
    }

    /// `(method, path)` of every request received so far.
    #[must_use]
    pub fn request_lines(&self) -> Vec<(Method, String)> {
        self.requests()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect()
    }

    /// `(product_id, quantity)` of every line in the cart of `token`.
    #[must_use]
    pub fn cart_lines(&self, token: &str) -> Vec<(i64, i64)> {
        self.with_state(|s| {
            s.carts
                .get(token)
                .map(|lines| lines.iter().map(|l| (l.product_id, l.quantity)).collect())
                .unwrap_or_default()
        })
    }
}

impl Drop for FakeCartBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/cart", get(fetch_cart).delete(clear_cart))
        .route("/api/cart/items", axum::routing::post(add_item))
        .route("/api/cart/items/{id}", put(update_item).delete(remove_item))
        .with_state(state)
}

// =============================================================================
// Request handling
// =============================================================================

#[derive(Deserialize)]
struct AddItemBody {
    #[serde(rename = "productId")]
    product_id: i64,
    quantity: i64,
}

#[derive(Deserialize)]
struct UpdateItemBody {
    quantity: i64,
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// Record the request and decide whether it may proceed.
///
/// Returns the caller's token on success, or the response to send.
fn admit(
    state: &mut BackendState,
    endpoint: Endpoint,
    method: Method,
    path: String,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Result<String, Response> {
    let header_str = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let authorization = header_str(header::AUTHORIZATION);
    state.requests.push(RecordedRequest {
        method,
        path,
        authorization: authorization.clone(),
        content_type: header_str(header::CONTENT_TYPE),
        body,
    });

    if state.rate_limited {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "7")],
            "slow down",
        )
            .into_response());
    }

    let token = authorization
        .as_deref()
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty() && !state.rejected_tokens.contains(*t))
        .map(str::to_string)
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Unauthenticated."))?;

    if state.failing.contains(&endpoint) {
        return Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Server Error"));
    }
    Ok(token)
}

fn render_cart(state: &BackendState, token: &str) -> Value {
    let key = if state.camel_case_product_id {
        "productId"
    } else {
        "product_id"
    };
    let items: Vec<Value> = state
        .carts
        .get(token)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|line| {
            let mut item = json!({ "id": line.id, key: line.product_id, "quantity": line.quantity });
            if let Some(product) = state.catalog.get(&line.product_id) {
                item["product"] = product.clone();
            }
            item
        })
        .collect();

    let cart = json!({ "id": 1, "client_id": 1, "items": items });
    if state.wrap_responses {
        json!({ "data": cart, "message": "ok" })
    } else {
        cart
    }
}

fn ack() -> Response {
    Json(json!({ "message": "ok" })).into_response()
}

async fn fetch_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match admit(
        &mut state,
        Endpoint::FetchCart,
        Method::GET,
        "/api/cart".to_string(),
        &headers,
        None,
    ) {
        Ok(token) => Json(render_cart(&state, &token)).into_response(),
        Err(response) => response,
    }
}

async fn add_item(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let token = match admit(
        &mut state,
        Endpoint::AddItem,
        Method::POST,
        "/api/cart/items".to_string(),
        &headers,
        Some(body.clone()),
    ) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let Ok(AddItemBody {
        product_id,
        quantity,
    }) = serde_json::from_value(body)
    else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Invalid body.");
    };
    if quantity < 1 || state.rejected_products.contains(&product_id) {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Product unavailable.");
    }

    state.next_line_id += 1;
    let next_id = state.next_line_id;
    let lines = state.carts.entry(token).or_default();
    if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
        line.quantity += quantity;
    } else {
        lines.push(Line {
            id: next_id,
            product_id,
            quantity,
        });
    }
    (StatusCode::CREATED, Json(json!({ "message": "Item added" }))).into_response()
}

async fn update_item(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let token = match admit(
        &mut state,
        Endpoint::UpdateItem,
        Method::PUT,
        format!("/api/cart/items/{id}"),
        &headers,
        Some(body.clone()),
    ) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let Ok(UpdateItemBody { quantity }) = serde_json::from_value(body) else {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Invalid body.");
    };
    let line = state
        .carts
        .get_mut(&token)
        .and_then(|lines| lines.iter_mut().find(|l| l.id == id));
    match line {
        Some(line) => {
            line.quantity = quantity;
            ack()
        }
        None => error(StatusCode::NOT_FOUND, "Cart item not found."),
    }
}

async fn remove_item(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let token = match admit(
        &mut state,
        Endpoint::RemoveItem,
        Method::DELETE,
        format!("/api/cart/items/{id}"),
        &headers,
        None,
    ) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let lines = state.carts.entry(token).or_default();
    let before = lines.len();
    lines.retain(|l| l.id != id);
    if lines.len() == before {
        return error(StatusCode::NOT_FOUND, "Cart item not found.");
    }
    ack()
}

async fn clear_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match admit(
        &mut state,
        Endpoint::ClearCart,
        Method::DELETE,
        "/api/cart".to_string(),
        &headers,
        None,
    ) {
        Ok(token) => {
            state.carts.remove(&token);
            ack()
        }
        Err(response) => response,
    }
}
