use chrono::naive::NaiveDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A requested password reset
///
/// The token handed out is `<id>.<secret>`, only the hash of the secret is kept
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PasswordReset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hashed_secret: String,
    pub expires_at: NaiveDateTime,
    pub used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl PasswordReset {
    /// Can the reset still be used at the given moment?
    pub fn is_usable_at(&self, now: NaiveDateTime) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

/// Delivery of password reset tokens to their users
///
/// Sending actual emails is left to an implementation of this trait
pub trait ResetNotifier: Send + Sync + 'static {
    /// Hand the reset token to the user owning `email`
    fn send_reset_token(&self, email: &str, token: &str);
}

/// Notifier that writes the reset token to the log
///
/// Useful for local setups without a mail server
#[derive(Clone, Copy, Debug, Default)]
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn send_reset_token(&self, email: &str, token: &str) {
        tracing::info!("Password reset requested for {email}, token: {token}");
    }
}
