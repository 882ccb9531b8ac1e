//! Login and registration.
//!
//! Input is validated locally first; the backend is only called with
//! credentials that pass.

use chatsync_core::validation;
use chatsync_types::User;

use crate::backend::Backend;
use crate::engine::EngineError;

/// Log in with email and password.
pub async fn login(backend: &dyn Backend, email: &str, password: &str) -> Result<User, EngineError> {
    let email = email.trim();
    validation::login_credentials(email, password)?;
    let user = backend.login(email, password).await?;
    tracing::info!("Logged in as {}", user.username);
    Ok(user)
}

/// Create an account and return the new user.
pub async fn register(
    backend: &dyn Backend,
    email: &str,
    password: &str,
) -> Result<User, EngineError> {
    let email = email.trim();
    validation::register_credentials(email, password)?;
    let user = backend.register(email, password).await?;
    tracing::info!("Registered {}", user.username);
    Ok(user)
}
