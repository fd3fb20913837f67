//! Hearthwood Core - Shared types library.
//!
//! This crate provides the types shared by the cart synchronization engine
//! and the tools built on top of it:
//! - `cart` - Guest/authenticated cart and wishlist engine
//! - `cli` - Command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! persistence, no HTTP clients. The totals calculator lives here because it
//! is a pure function of the item list.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, cart and wishlist rows, money helpers, totals

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
