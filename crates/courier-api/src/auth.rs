use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use courier_gateway::blocking;
use courier_types::api::{Claims, LoginForm, LoginResponse, RegisterRequest, RegisterResponse, StatusMessage};
use courier_types::models::GENERAL_CHANNEL_ID;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AUTH_COOKIE, decode_token, token_from_headers};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 64;

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();
    validate_registration(&email, &name, &req.password, &req.password_check)?;

    let user_id = Uuid::new_v4();
    let password = req.password;
    let created = blocking(&state.db, {
        let email = email.clone();
        move |db| {
            if db.get_user_by_email(&email)?.is_some() {
                return Ok(false);
            }

            // Hash password with Argon2id
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
                .to_string();

            // A concurrent registration may have taken the email since the check
            db.create_user(&user_id.to_string(), &email, &name, &password_hash)
        }
    })
    .await?;

    if !created {
        return Err(ApiError::Conflict("a user with this email already exists".into()));
    }

    state.channels.add_member(GENERAL_CHANNEL_ID, user_id).await?;
    info!("Registered user {} ({})", user_id, email);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            ok: true,
            user_id,
            message: "registration successful".into(),
        }),
    ))
}

fn validate_registration(email: &str, name: &str, password: &str, password_check: &str) -> ApiResult<()> {
    if email.is_empty() || name.is_empty() || password.is_empty() || password_check.is_empty() {
        return Err(ApiError::validation("all fields are required"));
    }
    if !email.contains('@') {
        return Err(ApiError::validation("email is not valid"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::validation("name is too long"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if password != password_check {
        return Err(ApiError::validation("passwords do not match"));
    }
    Ok(())
}

/// OAuth2 password form login. Sets the access token cookie on success.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Form(form), _): WithRejection<Form<LoginForm>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let email = form.username.trim().to_lowercase();
    let password = form.password;

    let user = blocking(&state.db, {
        let email = email.clone();
        move |db| {
            let Some(user) = db.get_user_by_email(&email)? else {
                return Ok(None);
            };

            // Verify password
            let parsed_hash = PasswordHash::new(&user.password)
                .map_err(|e| anyhow::anyhow!("corrupt password hash for {}: {}", user.id, e))?;
            let valid = Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok();

            Ok(valid.then_some(user))
        }
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login for {}", email);
        return Err(ApiError::auth("incorrect email or password"));
    };

    let user = user.into_user()?;
    let token = create_token(&state.auth.jwt_secret, user.id, &user.name, state.auth.token_ttl)?;

    let cookie = Cookie::build((AUTH_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.auth.cookie_secure);

    info!("{} logged in", user.id);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            ok: true,
            user_id: user.id,
            access_token: token,
            token_type: "bearer".into(),
            message: "login successful".into(),
        }),
    ))
}

/// Clear the auth cookie and disconnect the caller's live sockets.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, jar: CookieJar) -> impl IntoResponse {
    if let Some(claims) = optional_claims(&state, &headers) {
        let closed = state.registry.close_user(claims.sub);
        info!("{} logged out ({} sessions closed)", claims.sub, closed);
    }

    (
        jar.remove(Cookie::build(AUTH_COOKIE).path("/")),
        Json(StatusMessage::new("logged out")),
    )
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Claims of the caller if the request carries a valid token.
fn optional_claims(state: &AppState, headers: &HeaderMap) -> Option<Claims> {
    token_from_headers(headers).and_then(|t| decode_token(&state.auth.jwt_secret, &t).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_validation() {
        assert!(validate_registration("a@b.c", "Ada", "longenough", "longenough").is_ok());
        assert!(matches!(
            validate_registration("", "Ada", "longenough", "longenough"),
            Err(ApiError::Validation(_))
        ));
        assert!(validate_registration("not-an-email", "Ada", "longenough", "longenough").is_err());
        assert!(validate_registration("a@b.c", "Ada", "short", "short").is_err());
        assert!(validate_registration("a@b.c", "Ada", "longenough", "different!").is_err());
    }

    #[test]
    fn token_round_trip() {
        let user = Uuid::new_v4();
        let token = create_token("secret", user, "Ada", chrono::Duration::hours(1)).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.name, "Ada");

        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token("secret", Uuid::new_v4(), "Ada", chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(decode_token("secret", &token), Err(ApiError::Auth(_))));
    }
}
