//! Remote cart service: the trait the synchronizer talks to and its HTTP client.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |---|---|
//! | fetch cart | `GET /cart` |
//! | add item | `POST /cart/items` with `{ productId, quantity }` |
//! | update item | `PUT /cart/items/{id}` with `{ quantity }` |
//! | remove item | `DELETE /cart/items/{id}` |
//! | clear cart | `DELETE /cart` |
//!
//! Every request carries the session's bearer token. Mutation responses are
//! not interpreted; the synchronizer reloads the cart afterwards to pick up
//! server-computed fields.

mod wire;

use std::future::Future;
use std::sync::Arc;

use reqwest::StatusCode;
use secrecy::ExposeSecret;
use tracing::{debug, error, instrument};
use varketplace_core::{Cart, CartItemId, ProductId};

use crate::auth::AuthSession;
use crate::config::ApiConfig;
use crate::error::CartError;

use wire::{AddItemBody, UpdateItemBody, decode_cart};

/// Backend holding the signed-in user's cart.
pub trait CartService: Send + Sync {
    /// Fetch the user's cart.
    fn fetch_cart(
        &self,
        session: &AuthSession,
    ) -> impl Future<Output = Result<Cart, CartError>> + Send;

    /// Add `quantity` of a product.
    fn add_item(
        &self,
        session: &AuthSession,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), CartError>> + Send;

    /// Set a line's quantity.
    fn update_item(
        &self,
        session: &AuthSession,
        item_id: CartItemId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), CartError>> + Send;

    /// Delete a line.
    fn remove_item(
        &self,
        session: &AuthSession,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<(), CartError>> + Send;

    /// Delete every line.
    fn clear_cart(&self, session: &AuthSession)
    -> impl Future<Output = Result<(), CartError>> + Send;
}

// =============================================================================
// HttpCartService
// =============================================================================

/// JSON-over-HTTP client for the cart backend.
#[derive(Clone)]
pub struct HttpCartService {
    inner: Arc<HttpCartServiceInner>,
}

struct HttpCartServiceInner {
    client: reqwest::Client,
    cart_url: String,
    items_url: String,
}

impl HttpCartService {
    /// Create a new client for the configured API base.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, CartError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        // The base always ends in '/', so appending keeps its path.
        let base = config.base_url.as_str();
        let cart_url = format!("{base}cart");
        let items_url = format!("{base}cart/items");

        Ok(Self {
            inner: Arc::new(HttpCartServiceInner {
                client,
                cart_url,
                items_url,
            }),
        })
    }

    fn item_url(&self, item_id: CartItemId) -> String {
        format!("{}/{item_id}", self.inner.items_url)
    }

    /// Send a request with credentials and return the body of a 2xx response.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        session: &AuthSession,
    ) -> Result<String, CartError> {
        let response = request
            .bearer_auth(session.token().expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(CartError::Unauthorized);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(CartError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Cart backend returned non-success status"
            );
            return Err(CartError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(body)
    }
}

impl CartService for HttpCartService {
    #[instrument(skip(self, session), fields(user_id = %session.user_id()))]
    async fn fetch_cart(&self, session: &AuthSession) -> Result<Cart, CartError> {
        let request = self.inner.client.get(&self.inner.cart_url);
        let body = self.execute(request, session).await?;

        let cart = decode_cart(&body).inspect_err(|e| {
            error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse cart response"
            );
        })?;
        debug!(lines = cart.items.len(), "Fetched remote cart");
        Ok(cart)
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id()))]
    async fn add_item(
        &self,
        session: &AuthSession,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), CartError> {
        let request = self
            .inner
            .client
            .post(&self.inner.items_url)
            .json(&AddItemBody {
                product_id,
                quantity,
            });
        self.execute(request, session).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id()))]
    async fn update_item(
        &self,
        session: &AuthSession,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<(), CartError> {
        let request = self
            .inner
            .client
            .put(self.item_url(item_id))
            .json(&UpdateItemBody { quantity });
        self.execute(request, session).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id()))]
    async fn remove_item(&self, session: &AuthSession, item_id: CartItemId) -> Result<(), CartError> {
        let request = self.inner.client.delete(self.item_url(item_id));
        self.execute(request, session).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id()))]
    async fn clear_cart(&self, session: &AuthSession) -> Result<(), CartError> {
        let request = self.inner.client.delete(&self.inner.cart_url);
        self.execute(request, session).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpCartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartService")
            .field("cart_url", &self.inner.cart_url)
            .finish_non_exhaustive()
    }
}
