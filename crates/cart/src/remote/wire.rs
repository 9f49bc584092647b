//! Backend JSON payloads and their conversion to core types.
//!
//! The backend is loose about shapes: the cart may come bare or wrapped as
//! `{ "data": cart, "message": ... }`, and a line's product ID may be
//! `product_id`, `productId`, or only `product.id`. Conversion accepts all of
//! these and restores the cart invariants before anything else sees the data.

use serde::{Deserialize, Serialize};
use tracing::warn;
use varketplace_core::{Cart, CartId, CartItem, CartItemId, ProductId, ProductSnapshot, UserId};

use crate::error::CartError;

/// `POST /cart/items` body.
#[derive(Debug, Serialize)]
pub(crate) struct AddItemBody {
    #[serde(rename = "productId")]
    pub product_id: ProductId,
    pub quantity: u32,
}

/// `PUT /cart/items/{id}` body.
#[derive(Debug, Serialize)]
pub(crate) struct UpdateItemBody {
    pub quantity: u32,
}

/// Top-level cart fields. Lines stay raw JSON so one odd line cannot fail
/// the whole cart.
#[derive(Debug, Deserialize)]
struct RemoteCart {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    client_id: Option<serde_json::Value>,
    #[serde(default)]
    items: Option<Vec<serde_json::Value>>,
}

/// Decode a `GET /cart` response body.
///
/// # Errors
///
/// Returns `CartError::Decode` if the body is not JSON or not a cart object.
pub(crate) fn decode_cart(body: &str) -> Result<Cart, CartError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let value = unwrap_data(value);
    let remote: RemoteCart = serde_json::from_value(value)?;
    Ok(convert_cart(remote))
}

/// Take `data` out of a `{ data, message }` wrapper; leave anything else.
fn unwrap_data(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map)
            if map.get("data").is_some_and(serde_json::Value::is_object) =>
        {
            map.remove("data").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

fn convert_cart(remote: RemoteCart) -> Cart {
    let items = remote
        .items
        .unwrap_or_default()
        .iter()
        .filter_map(convert_item)
        .collect();

    let mut cart = Cart {
        server_id: remote.id.as_ref().and_then(integer).map(CartId::new),
        owner_id: remote.client_id.as_ref().and_then(integer).map(UserId::new),
        items,
    };
    let folded = cart.normalize();
    if folded > 0 {
        warn!(
            cart_id = ?cart.server_id,
            folded,
            "Remote cart had duplicate or empty lines"
        );
    }
    cart
}

fn convert_item(line: &serde_json::Value) -> Option<CartItem> {
    if !line.is_object() {
        warn!(%line, "Skipping remote cart line that is not an object");
        return None;
    }
    let line_id = line.get("id").and_then(integer).map(CartItemId::new);
    let product = line.get("product").filter(|p| !p.is_null());

    let snapshot = product.and_then(|p| {
        serde_json::from_value::<ProductSnapshot>(p.clone())
            .map_err(|e| warn!(?line_id, error = %e, "Ignoring unreadable product snapshot"))
            .ok()
    });

    let product_id = line
        .get("product_id")
        .and_then(integer)
        .or_else(|| line.get("productId").and_then(integer))
        .or_else(|| product.and_then(|p| p.get("id")).and_then(integer))
        .map(ProductId::new);

    let Some(product_id) = product_id else {
        warn!(?line_id, "Skipping remote cart line without a product ID");
        return None;
    };

    let quantity = line.get("quantity").and_then(integer).unwrap_or(0);
    if quantity <= 0 {
        return None;
    }
    let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);

    Some(CartItem {
        server_id: line_id,
        product_id,
        quantity,
        product: snapshot,
        merged_server_ids: Vec::new(),
    })
}

/// An integer given as a JSON number or a numeric string.
fn integer(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
