//! Core types for Varketplace.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod price;
pub mod product;

pub use cart::{Cart, CartItem, ItemKey, QuantityError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use product::{ProductImage, ProductRef, ProductSnapshot};
