//! Checkout session payload.
//!
//! Turns a cart into the request a hosted payment page expects: one line per
//! cart line with a unit amount in minor units, plus the URLs to return to.
//! The shape follows the common `price_data` / `product_data` layout so it
//! can be posted to a payment provider as-is.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use varketplace_core::{Cart, CartItem, CurrencyCode, Price};

/// Metadata tag identifying sessions created from this storefront.
pub const CHECKOUT_SOURCE: &str = "varketplace-frontend";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("No items provided for checkout")]
    EmptyCart,
}

/// A complete checkout session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub mode: &'static str,
    pub line_items: Vec<CheckoutLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutLineItem {
    pub price_data: PriceData,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceData {
    pub currency: &'static str,
    pub product_data: ProductData,
    /// Minor units (cents).
    pub unit_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductData {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Build the checkout request for `cart`.
///
/// `origin` is the storefront's public origin (e.g. `https://shop.example`);
/// without one the return URLs are relative paths.
///
/// # Errors
///
/// Returns `CheckoutError::EmptyCart` if the cart has no lines.
pub fn build_checkout_request(
    cart: &Cart,
    currency: CurrencyCode,
    origin: Option<&str>,
    customer_email: Option<&str>,
) -> Result<CheckoutRequest, CheckoutError> {
    if cart.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let line_items = cart
        .items
        .iter()
        .map(|item| line_item(item, currency))
        .collect();

    let origin = origin
        .map(|o| o.trim().trim_end_matches('/'))
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    metadata.insert("source".to_string(), CHECKOUT_SOURCE.to_string());

    Ok(CheckoutRequest {
        mode: "payment",
        line_items,
        success_url: format!("{origin}/checkout/success"),
        cancel_url: format!("{origin}/cart"),
        customer_email: customer_email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        metadata,
    })
}

fn line_item(item: &CartItem, currency: CurrencyCode) -> CheckoutLineItem {
    let snapshot = item.product.as_ref();

    let name = snapshot
        .and_then(|p| p.name.clone())
        .unwrap_or_else(|| format!("Product #{}", item.product_id));

    // Payment pages only load absolute image URLs.
    let images = snapshot
        .and_then(|p| p.images.first())
        .map(|image| image.url.as_str())
        .filter(|url| is_absolute_http(url))
        .map(str::to_string)
        .into_iter()
        .collect();

    let unit_amount = Price::new(item.unit_price().unwrap_or_default(), currency).to_minor_units();

    CheckoutLineItem {
        price_data: PriceData {
            currency: currency.code(),
            product_data: ProductData { name, images },
            unit_amount,
        },
        quantity: item.quantity,
    }
}

fn is_absolute_http(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use varketplace_core::{ProductId, ProductSnapshot};

    use super::*;

    fn cart() -> Cart {
        Cart::from_items(vec![
            CartItem::local(
                ProductId::new(7),
                2,
                Some(
                    ProductSnapshot::new(ProductId::new(7))
                        .with_name("Olive oil")
                        .with_price(Decimal::new(12345, 3))
                        .with_image("https://cdn.example/oil.jpg"),
                ),
            ),
            CartItem::local(ProductId::new(8), 1, None),
        ])
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        let result = build_checkout_request(&Cart::empty(), CurrencyCode::EUR, None, None);
        assert_eq!(result, Err(CheckoutError::EmptyCart));
    }

    #[test]
    fn test_line_items() {
        let request =
            build_checkout_request(&cart(), CurrencyCode::EUR, Some("https://shop.example/"), None)
                .unwrap();

        assert_eq!(request.line_items.len(), 2);
        let first = &request.line_items[0];
        assert_eq!(first.quantity, 2);
        assert_eq!(first.price_data.currency, "eur");
        // 12.345 rounds half away from zero.
        assert_eq!(first.price_data.unit_amount, 1235);
        assert_eq!(first.price_data.product_data.name, "Olive oil");
        assert_eq!(
            first.price_data.product_data.images,
            vec!["https://cdn.example/oil.jpg".to_string()]
        );

        let second = &request.line_items[1];
        assert_eq!(second.price_data.product_data.name, "Product #8");
        assert_eq!(second.price_data.unit_amount, 0);
        assert!(second.price_data.product_data.images.is_empty());
    }

    #[test]
    fn test_return_urls() {
        let request =
            build_checkout_request(&cart(), CurrencyCode::USD, Some("https://shop.example/"), None)
                .unwrap();
        assert_eq!(request.success_url, "https://shop.example/checkout/success");
        assert_eq!(request.cancel_url, "https://shop.example/cart");

        let relative = build_checkout_request(&cart(), CurrencyCode::USD, None, None).unwrap();
        assert_eq!(relative.success_url, "/checkout/success");
        assert_eq!(relative.cancel_url, "/cart");
    }

    #[test]
    fn test_relative_images_are_dropped() {
        let cart = Cart::from_items(vec![CartItem::local(
            ProductId::new(1),
            1,
            Some(ProductSnapshot::new(ProductId::new(1)).with_image("/uploads/a.png")),
        )]);
        let request = build_checkout_request(&cart, CurrencyCode::EUR, None, None).unwrap();
        assert!(request.line_items[0].price_data.product_data.images.is_empty());
    }

    #[test]
    fn test_negative_price_clamps_to_zero() {
        let cart = Cart::from_items(vec![CartItem::local(
            ProductId::new(1),
            1,
            Some(ProductSnapshot::new(ProductId::new(1)).with_price(Decimal::new(-5, 0))),
        )]);
        let request = build_checkout_request(&cart, CurrencyCode::EUR, None, None).unwrap();
        assert_eq!(request.line_items[0].price_data.unit_amount, 0);
    }

    #[test]
    fn test_oversized_price_saturates() {
        let cart = Cart::from_items(vec![CartItem::local(
            ProductId::new(1),
            2,
            Some(ProductSnapshot::new(ProductId::new(1)).with_price(Decimal::MAX)),
        )]);
        let request = build_checkout_request(&cart, CurrencyCode::EUR, None, None).unwrap();
        assert_eq!(request.line_items[0].price_data.unit_amount, i64::MAX);
    }

    #[test]
    fn test_serialized_shape() {
        let request = build_checkout_request(
            &cart(),
            CurrencyCode::EUR,
            Some("https://shop.example"),
            Some("buyer@example.com"),
        )
        .unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["mode"], "payment");
        assert_eq!(json["customer_email"], "buyer@example.com");
        assert_eq!(json["metadata"]["source"], CHECKOUT_SOURCE);
        assert_eq!(json["line_items"][0]["price_data"]["unit_amount"], 1235);
        assert!(json["line_items"][1]["price_data"]["product_data"].get("images").is_none());
    }
}
