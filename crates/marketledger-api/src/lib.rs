//! JSON REST API for the market ledger.
//!
//! Exposes an axum [`Router`] backed by any
//! [`marketledger_core::store::LedgerStore`]. Auth, TLS, and transport
//! concerns are the caller's responsibility; the acting user is taken from
//! the `X-Actor-Id` header when present.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", marketledger_api::api_router(store.clone(), resolver))
//! ```

pub mod error;
pub mod ledger;
pub mod markets;
pub mod operations;


use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use marketledger_core::{period::PeriodResolver, store::LedgerStore};

pub use error::ApiError;

/// Shared handler state: the backend plus the resolver used for request-time
/// period defaults.
pub struct AppState<S> {
  pub store:    Arc<S>,
  pub resolver: PeriodResolver,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), resolver: self.resolver }
  }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, resolver: PeriodResolver) -> Router<()>
where
  S: LedgerStore + 'static,
{
  Router::new()
    // Markets
    .route("/markets", get(markets::list::<S>).post(markets::create::<S>))
    .route("/markets/{id}", get(markets::get_one::<S>))
    .route("/markets/{id}/timezone", put(markets::set_timezone::<S>))
    .route("/markets/{id}/periods", get(ledger::periods::<S>))
    // Operations
    .route(
      "/markets/{id}/operations",
      get(operations::list::<S>).post(operations::create::<S>),
    )
    .route("/operations/{id}", get(operations::get_one::<S>))
    // Read model
    .route(
      "/markets/{id}/spaces/{space_id}/state",
      get(ledger::space_state::<S>),
    )
    .route(
      "/markets/{id}/totals/electricity",
      get(ledger::electricity_totals::<S>),
    )
    .route(
      "/markets/{id}/totals/adjustments",
      get(ledger::adjustment_totals::<S>),
    )
    .route("/markets/{id}/accruals", post(ledger::create_accrual::<S>))
    .with_state(AppState { store, resolver })
}
