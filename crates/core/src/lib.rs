//! Varketplace Core - Shared types library.
//!
//! This crate provides the types used across all Varketplace components:
//! - `cart` - Cart synchronizer (local mirror, remote service, auth transitions)
//! - `cli` - Command-line driver for the synchronizer
//!
//! # Architecture
//!
//! The core crate contains only types and the invariants they carry - no I/O,
//! no HTTP clients, no storage. This keeps it usable from any runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, product snapshots, carts and line items

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
