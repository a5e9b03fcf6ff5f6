//! User API management

use std::ops::Deref;
use std::sync::Arc;

use axum::Extension;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::password::generate;
use crate::password::hash;
use crate::password::verify;
use crate::storage::ChangePasswordValues;
use crate::storage::CreatePasswordResetValues;
use crate::storage::CreateUserValues;
use crate::storage::Storage;
use crate::users::ResetNotifier;
use crate::users::User;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::JwtKeys;
use super::Success;
use super::current_user::Token;
use super::current_user::generate_token;
use super::request::parse_email;
use super::request::parse_password;

/// How long a password reset token can be used, in hours
const RESET_EXPIRES_IN_HOURS: i64 = 1;

/// The user response information
///
/// A subset of all the information, ready to be serialized for the outside world
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// The user ID
    pub id: Uuid,

    /// The email address
    pub email: String,
}

impl UserResponse {
    /// Create a user response from a [`User`](User)
    fn from_user(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
        }
    }
}

/// Credentials form, used to sign up and to log in
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsForm {
    /// Email address of the user
    email: String,
    /// Password of the user
    password: String,
}

/// Sign up a new user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "alice@example.com", "password": "verysecret" }' \
///     http://localhost:6000/api/users
/// ```
///
/// Response
/// ```json
/// { "data": { "id": "<uuid>", "email": "alice@example.com" } }
/// ```
pub async fn create<S: Storage>(
    Extension(storage): Extension<S>,
    Form(form): Form<CredentialsForm>,
) -> Result<Success<UserResponse>, Error> {
    let email = parse_email(&form.email)?;
    let password = parse_password(&form.password)?;

    let existing_user = storage
        .find_single_user_by_email(&email)
        .await
        .map_err(Error::internal_server_error)?;

    if existing_user.is_some() {
        return Err(Error::bad_request("User already exists"));
    }

    let hashed_password = hash(password).map_err(Error::internal_server_error)?;

    let values = CreateUserValues {
        session_id: &Uuid::new_v4(),
        email: &email,
        hashed_password: &hashed_password,
    };

    let user = storage
        .create_user(&values)
        .await
        .map_err(Error::internal_server_error)?;

    tracing::info!("User {} signed up", user.id);

    Ok(Success::created(UserResponse::from_user(user)))
}

/// Get a token for a user "session"
///
/// The token can then be used to access the rest of the API routes by using it in the
/// `Authorization` header
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "alice@example.com", "password": "verysecret" }' \
///     http://localhost:6000/api/users/token
/// ```
///
/// Response
/// ```json
/// { "data": { "token_type": "Bearer", "expires_in": 3600, "access_token": "some token" } }
/// ```
pub async fn token<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(storage): Extension<S>,
    Form(form): Form<CredentialsForm>,
) -> Result<Success<Token>, Error> {
    let user = storage
        .find_single_user_by_email(form.email.trim())
        .await
        .map_err(Error::internal_server_error)?;

    match user {
        Some(user) if verify(&user.hashed_password, &form.password) => {
            let token = generate_token(&jwt_keys, &user)?;

            Ok(Success::ok(token))
        }
        _ => Err(Error::bad_request("Invalid user")),
    }
}

/// Get the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/users/me
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "email": "alice@example.com" } }
/// ```
pub async fn single<S: Storage>(current_user: CurrentUser<S>) -> Success<UserResponse> {
    Success::ok(UserResponse::from_user(current_user.deref().clone()))
}

/// Change password form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    /// Current password for verification
    current_password: String,
    /// New password
    password: String,
}

/// Change the password of the current user
///
/// Changing your password will invalidate your current access token
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "currentPassword": "verysecret", "password": "veryverysecret" }' \
///     http://localhost:6000/api/users/me/password
/// ```
///
/// Response
/// ```json
/// { "data": { "token_type": "Bearer", "expires_in": 3600, "access_token": "some token" } }
/// ```
pub async fn change_password<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Success<Token>, Error> {
    if !verify(&current_user.hashed_password, &form.current_password) {
        return Err(Error::bad_request("Invalid password"));
    }

    let password = parse_password(&form.password)?;
    let hashed_password = hash(password).map_err(Error::internal_server_error)?;

    let values = ChangePasswordValues {
        session_id: &Uuid::new_v4(),
        hashed_password: &hashed_password,
    };

    let updated_user = storage
        .change_password(&current_user, &values)
        .await
        .map_err(Error::internal_server_error)?;

    let token = generate_token(&jwt_keys, &updated_user)?;

    Ok(Success::ok(token))
}

/// Request password reset form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPasswordResetForm {
    /// Email address of the user who forgot the password
    email: String,
}

/// Request a password reset
///
/// Always accepted, whether the email address is known or not, the reset token is handed to the
/// [`ResetNotifier`]
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "alice@example.com" }' \
///     http://localhost:6000/api/users/password-reset
/// ```
pub async fn request_password_reset<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(reset_notifier): Extension<Arc<dyn ResetNotifier>>,
    Form(form): Form<RequestPasswordResetForm>,
) -> Result<Success<&'static str>, Error> {
    let user = storage
        .find_single_user_by_email(form.email.trim())
        .await
        .map_err(Error::internal_server_error)?;

    let Some(user) = user else {
        tracing::debug!("Password reset requested for unknown email address");
        return Ok(Success::accepted());
    };

    let id = Uuid::new_v4();
    let secret = generate();
    let hashed_secret = hash(&secret).map_err(Error::internal_server_error)?;

    let values = CreatePasswordResetValues {
        id: &id,
        user: &user,
        hashed_secret: &hashed_secret,
        expires_at: Utc::now().naive_utc() + Duration::hours(RESET_EXPIRES_IN_HOURS),
    };

    storage
        .create_password_reset(&values)
        .await
        .map_err(Error::internal_server_error)?;

    reset_notifier.send_reset_token(&user.email, &format!("{id}.{secret}"));

    Ok(Success::accepted())
}

/// Confirm password reset form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPasswordResetForm {
    /// Token handed out by the password reset request
    token: String,
    /// New password
    password: String,
}

/// Set a new password with a password reset token
///
/// A token can be used once, all current access tokens of the user are invalidated
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "token": "<id>.<secret>", "password": "veryverysecret" }' \
///     http://localhost:6000/api/users/password-reset/confirm
/// ```
pub async fn confirm_password_reset<S: Storage>(
    Extension(storage): Extension<S>,
    Form(form): Form<ConfirmPasswordResetForm>,
) -> Result<Success<&'static str>, Error> {
    let invalid_token = || Error::bad_request("Invalid or expired reset token");

    let password = parse_password(&form.password)?;

    let (id, secret) = form.token.split_once('.').ok_or_else(invalid_token)?;
    let id = Uuid::parse_str(id).map_err(|_| invalid_token())?;

    let reset = storage
        .find_single_password_reset_by_id(&id)
        .await
        .map_err(Error::internal_server_error)?
        .ok_or_else(invalid_token)?;

    if !reset.is_usable_at(Utc::now().naive_utc()) || !verify(&reset.hashed_secret, secret) {
        return Err(invalid_token());
    }

    let user = storage
        .find_single_user_by_id(&reset.user_id)
        .await
        .map_err(Error::internal_server_error)?
        .ok_or_else(invalid_token)?;

    // Only the first use of a reset continues
    let is_first_use = storage
        .use_password_reset(&reset)
        .await
        .map_err(Error::internal_server_error)?;

    if !is_first_use {
        return Err(invalid_token());
    }

    let hashed_password = hash(password).map_err(Error::internal_server_error)?;

    let values = ChangePasswordValues {
        session_id: &Uuid::new_v4(),
        hashed_password: &hashed_password,
    };

    storage
        .change_password(&user, &values)
        .await
        .map_err(Error::internal_server_error)?;

    tracing::info!("Password of user {} is reset", user.id);

    Ok(Success::no_content())
}
