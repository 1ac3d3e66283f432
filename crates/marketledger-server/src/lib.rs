//! Configuration and application assembly for the ledger HTTP server.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use axum::Router;
use chrono_tz::Tz;
use marketledger_core::{period::PeriodResolver, store::LedgerStore};
use marketledger_store_sqlite::SqliteStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

/// Environment variables with this prefix override file settings, e.g.
/// `MARKETLEDGER_PORT=9000`.
pub const ENV_PREFIX: &str = "MARKETLEDGER";

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
  pub host:             String,
  pub port:             u16,
  pub store_path:       PathBuf,
  /// IANA name used when a market has no usable timezone.
  pub default_timezone: String,
}

impl ServerConfig {
  /// Load from an optional TOML file at `path`, then environment overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .set_default("host", "127.0.0.1")?
      .set_default("port", 8080)?
      .set_default("store_path", "ledger.db")?
      .set_default("default_timezone", "UTC")?
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  /// The configured default timezone. An unknown name is a startup error
  /// rather than a silent fallback.
  pub fn default_tz(&self) -> anyhow::Result<Tz> {
    self
      .default_timezone
      .trim()
      .parse::<Tz>()
      .map_err(|e| anyhow::anyhow!("invalid default_timezone {:?}: {e}", self.default_timezone))
  }

  /// `store_path` with a leading `~` expanded.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full application: the JSON API under `/api`, with request tracing.
pub fn app<S>(store: Arc<S>, resolver: PeriodResolver) -> Router
where
  S: LedgerStore + 'static,
{
  Router::new()
    .nest("/api", marketledger_api::api_router(store, resolver))
    .layer(TraceLayer::new_for_http())
}

/// [`app`] over a SQLite store, reusing the store's own resolver so reads,
/// writes and request defaults agree on the default timezone.
pub fn app_for_store(store: SqliteStore) -> Router {
  let resolver = *store.resolver();
  app(Arc::new(store), resolver)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
  };
  use chrono::Utc;
  use marketledger_core::period::effective_month;
  use tower::ServiceExt as _;

  use super::*;

  fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir()
      .join(format!("marketledger-{}-{name}.toml", std::process::id()));
    fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn loads_file_over_defaults() {
    let path = write_config(
      "full",
      r#"
        port = 9100
        store_path = "/var/lib/ledger.db"
        default_timezone = "Asia/Vladivostok"
      "#,
    );
    let cfg = ServerConfig::load(&path).unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.port, 9100);
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/ledger.db"));
    assert_eq!(cfg.default_tz().unwrap(), chrono_tz::Asia::Vladivostok);
    assert_eq!(cfg.address(), "127.0.0.1:9100");
  }

  #[test]
  fn missing_file_uses_defaults() {
    let cfg = ServerConfig::load(Path::new("/nonexistent/marketledger.toml")).unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.default_tz().unwrap(), Tz::UTC);
  }

  #[test]
  fn unknown_default_timezone_is_an_error() {
    let cfg = ServerConfig {
      host:             "0.0.0.0".into(),
      port:             1,
      store_path:       "ledger.db".into(),
      default_timezone: "Middle/Earth".into(),
    };
    assert!(cfg.default_tz().is_err());
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(
      expand_tilde(Path::new("~/ledger.db")),
      PathBuf::from(home).join("ledger.db")
    );
    assert_eq!(expand_tilde(Path::new("/abs/ledger.db")), PathBuf::from("/abs/ledger.db"));
  }

  #[tokio::test]
  async fn api_is_mounted_under_prefix() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let app = app(Arc::new(store), PeriodResolver::default());

    let resp = app
      .clone()
      .oneshot(Request::get("/api/markets").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
      .oneshot(Request::get("/markets").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn api_defaults_follow_store_timezone() {
    let tz = chrono_tz::Pacific::Kiritimati;
    let store = SqliteStore::open_in_memory()
      .await
      .unwrap()
      .with_default_timezone(tz);
    let app = app_for_store(store);

    let resp = app
      .oneshot(
        Request::get("/api/markets/404/spaces/1/state")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    let expected = effective_month(Utc::now(), tz).format("%Y-%m-%d").to_string();
    assert_eq!(body["period"], expected.as_str());
  }
}
