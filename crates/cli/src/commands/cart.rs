//! Cart commands.
//!
//! Each command loads the cart first so it acts on the current state, then
//! prints the resulting cart with its totals.

use rust_decimal::Decimal;
use serde::Serialize;
use varketplace_cart::{CartMode, ErrorKind, build_checkout_request};
use varketplace_core::{Cart, CurrencyCode, ItemKey, ProductId, ProductRef, ProductSnapshot};

use super::{CommandError, Context, emit};

#[derive(Serialize)]
struct CartSummary<'a> {
    mode: &'static str,
    cart: &'a Cart,
    total_item_count: u64,
    total_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<ErrorKind>,
}

fn print_cart(ctx: &Context, cart: &Cart) -> Result<(), CommandError> {
    let mode = match ctx.sync.mode() {
        CartMode::Guest => "guest",
        CartMode::Authenticated => "authenticated",
    };
    emit(&CartSummary {
        mode,
        cart,
        total_item_count: cart.total_item_count(),
        total_price: cart.total_price(),
        last_error: ctx.sync.last_error(),
    })
}

pub async fn show(ctx: &Context) -> Result<(), CommandError> {
    let cart = ctx.sync.load_cart().await;
    print_cart(ctx, &cart)
}

pub async fn add(
    ctx: &Context,
    product_id: ProductId,
    quantity: u32,
    name: Option<String>,
    price: Option<Decimal>,
) -> Result<(), CommandError> {
    let product = if name.is_none() && price.is_none() {
        ProductRef::Id(product_id)
    } else {
        let mut snapshot = ProductSnapshot::new(product_id);
        snapshot.name = name;
        snapshot.price = price;
        ProductRef::Snapshot(snapshot)
    };

    ctx.sync.load_cart().await;
    let cart = ctx.sync.add_to_cart(product, quantity).await?;
    if let Some(kind) = ctx.sync.last_error() {
        tracing::warn!(%kind, "Added locally only");
    }
    print_cart(ctx, &cart)
}

pub async fn update(ctx: &Context, key: ItemKey, quantity: u32) -> Result<(), CommandError> {
    ctx.sync.load_cart().await;
    let cart = ctx.sync.update_item(key, quantity).await?;
    print_cart(ctx, &cart)
}

pub async fn remove(ctx: &Context, key: ItemKey) -> Result<(), CommandError> {
    ctx.sync.load_cart().await;
    let cart = ctx.sync.remove_item(key).await?;
    print_cart(ctx, &cart)
}

pub async fn clear(ctx: &Context) -> Result<(), CommandError> {
    ctx.sync.load_cart().await;
    let cart = ctx.sync.clear_cart().await?;
    print_cart(ctx, &cart)
}

pub async fn checkout(
    ctx: &Context,
    currency: CurrencyCode,
    origin: Option<&str>,
    email: Option<&str>,
) -> Result<(), CommandError> {
    let cart = ctx.sync.load_cart().await;
    let request = build_checkout_request(&cart, currency, origin, email)?;
    tracing::info!(
        lines = request.line_items.len(),
        currency = currency.code(),
        "Built checkout request"
    );
    emit(&request)
}
