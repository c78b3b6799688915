use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use wisp_db::Store;
use wisp_types::api::{LoginRequest, LoginResponse, SignupRequest, SignupResponse};

use crate::error::ApiError;
use crate::middleware::create_token;
use crate::{run_blocking, AppState};

/// Bounds Argon2 work on hostile input.
const MAX_PASSWORD_LEN: usize = 128;

fn validate_email(email: &str) -> Result<(), ApiError> {
    let well_formed = email.len() <= 255
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 6 {
        return Err(ApiError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::Validation("password too long".into()));
    }
    Ok(())
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    // Argon2 hashing and the insert both belong off the async runtime.
    let user_id = run_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
            .to_string();

        Ok(state.store.create_user(&req.email, &hash)?)
    })
    .await?;

    info!(%user_id, "user created");
    Ok((StatusCode::CREATED, Json(SignupResponse { id: user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::Validation("password too long".into()));
    }

    let (user_id, token) = run_blocking(move || {
        // Absent user and bad password collapse into the same 401.
        let (user_id, stored_hash) = state
            .store
            .get_user_by_email(&req.email)
            .map_err(|_| ApiError::Unauthorized)?;

        let parsed =
            PasswordHash::new(&stored_hash).map_err(|e| anyhow::anyhow!("bad stored hash: {e}"))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed)
            .map_err(|_| ApiError::Unauthorized)?;

        let token = create_token(&state.jwt_secret, &user_id)
            .map_err(|e| anyhow::anyhow!("token signing failed: {e}"))?;
        Ok((user_id, token))
    })
    .await?;

    Ok(Json(LoginResponse { user_id, token }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@nodot").is_err());
    }

    #[test]
    fn password_bounds() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(MAX_PASSWORD_LEN + 1)).is_err());
    }
}
