#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]

//! Noted, a note keeping service
//!
//! The server half is an axum router over a [`Storage`](storage::Storage) backend: notes with
//! owners, sharing through access grants, version-checked updates and a change feed. The client
//! half lives in [`client`]: an optimistic note store, an offline mutation queue and an editing
//! presence signal, all talking to the server through [`client::NotesApi`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::StatusCode;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use api::JwtKeys;
pub use changes::ChangeFeed;
pub use changes::ChangeKind;
pub use changes::NoteChange;
pub use storage::StorageConfig;
pub use users::LogResetNotifier;
pub use users::ResetNotifier;
pub use utils::env_var_or_else;

use crate::storage::Memory;
use crate::storage::Postgres;
use crate::storage::Storage;

mod api;
mod changes;
pub mod client;
mod graceful_shutdown;
mod notes;
mod password;
mod storage;
#[cfg(test)]
mod tests;
mod users;
mod utils;

pub use graceful_shutdown::handler as shutdown_handler;

/// Default time a single request may take before it fails closed
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Everything the router needs next to the storage
#[derive(Clone)]
pub struct Settings {
    /// Keys to sign and verify access tokens
    pub jwt_keys: JwtKeys,

    /// Fan-out of note changes to subscribed clients
    pub change_feed: ChangeFeed,

    /// Delivery of password reset tokens
    pub reset_notifier: Arc<dyn ResetNotifier>,

    /// Upper bound for producing a response
    pub request_timeout: Duration,
}

impl Settings {
    /// Settings from the environment
    ///
    /// - `JWT_SECRET`, generated when missing (tokens will not survive a restart)
    /// - `REQUEST_TIMEOUT_SECS`, defaults to 10 seconds
    pub fn from_env(change_feed: ChangeFeed) -> Result<Self> {
        let request_timeout = env_var_or_else("REQUEST_TIMEOUT_SECS", || {
            DEFAULT_REQUEST_TIMEOUT_SECS.to_string()
        })
        .parse::<u64>()?;

        Ok(Self {
            jwt_keys: setup_jwt_keys(),
            change_feed,
            reset_notifier: Arc::new(LogResetNotifier),
            request_timeout: Duration::from_secs(request_timeout),
        })
    }
}

/// Create and setup the app with its dependencies
///
/// # Errors
///
/// Will return `Err` if any of its dependencies fail to load:
/// - Configuration from the environment
/// - Database connection or migrations
pub async fn setup_app(config: StorageConfig, change_feed: ChangeFeed) -> Result<Router> {
    let settings = Settings::from_env(change_feed)?;

    let router = match config {
        StorageConfig::DetectConfig => {
            if let Ok(database_url) = std::env::var("DATABASE_URL")
                && !database_url.is_empty()
            {
                create_router(Postgres::connect(&database_url).await?, settings)
            } else {
                tracing::warn!("`DATABASE_URL` is not set, notes are kept in memory only");
                create_router(Memory::new(), settings)
            }
        }
        StorageConfig::Memory => create_router(Memory::new(), settings),
        StorageConfig::ExistingConnection(pool) => {
            create_router(Postgres::with_pool(pool).await?, settings)
        }
    };

    Ok(router)
}

/// Create the router for Noted
fn create_router<S: Storage>(storage: S, settings: Settings) -> Router {
    Router::new()
        .nest("/api", api::router::<S>())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            settings.request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(storage))
        .layer(Extension(settings.jwt_keys))
        .layer(Extension(settings.change_feed))
        .layer(Extension(settings.reset_notifier))
}

fn setup_jwt_keys() -> JwtKeys {
    use crate::password::generate;

    let jwt_secret = env_var_or_else("JWT_SECRET", || {
        let jwt_secret = generate();
        tracing::info!("`JWT_SECRET` is not set, generating temporary one: {jwt_secret}");
        jwt_secret
    });

    JwtKeys::new(jwt_secret.as_bytes())
}
