//! All API endpoint setup

use axum::Router;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use axum::routing::put;

pub use current_user::CurrentUser;
pub use current_user::JwtKeys;
pub use request::Form;
pub use request::PathParameters;
pub use request::QueryParameters;
pub use response::Error;
pub use response::Success;

use crate::storage::Storage;

mod access;
mod current_user;
mod notes;
mod request;
mod response;
mod users;
mod utils;

/// Get the Axum router for all API routes
pub fn router<S: Storage>() -> Router {
    let users = Router::new()
        .route("/", post(users::create::<S>))
        .route("/token", post(users::token::<S>))
        .route("/me", get(users::single::<S>))
        .route("/me/password", put(users::change_password::<S>))
        .route("/password-reset", post(users::request_password_reset::<S>))
        .route(
            "/password-reset/confirm",
            post(users::confirm_password_reset::<S>),
        );

    let notes = Router::new()
        .route("/", get(notes::list::<S>))
        .route("/", post(notes::create::<S>))
        .route("/changes", get(notes::changes::<S>))
        .route("/{note}", get(notes::single::<S>))
        .route("/{note}", patch(notes::update::<S>))
        .route("/{note}", delete(notes::delete::<S>))
        .route("/{note}/editing", post(notes::editing::<S>))
        .route("/{note}/access", get(access::list::<S>))
        .route("/{note}/access", post(access::create::<S>))
        .route("/{note}/access/{user}", delete(access::delete::<S>));

    Router::new().nest("/users", users).nest("/notes", notes)
}
