//! Core types and trait definitions for the market operations ledger.
//!
//! No HTTP or database dependencies; every other crate in the workspace
//! builds on this one.

// Native `async fn` in trait impls; the trait spells out `Send` bounds.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod market;
pub mod operation;
pub mod payload;
pub mod period;
pub mod record;
pub mod state;
pub mod store;

pub use error::{Error, Result, ValidationError};
