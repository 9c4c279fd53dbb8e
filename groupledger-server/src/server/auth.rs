use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use groupledger_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};

/// Default lifetime of tokens minted by the `token` command.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub user_id: String,
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };
    if claims.sub.trim().is_empty() {
        warn!(jti = %claims.jti, "auth: token without subject");
        return unauthorized();
    }

    let auth = AuthCtx {
        user_id: claims.sub.clone(),
        claims,
    };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

/// Mints a signed bearer token for `user_id`.
pub fn issue_token(secret: &str, user_id: &str, ttl_days: i64) -> Result<String, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::bad_request("user id cannot be empty"));
    }
    let claims = JwtClaims {
        sub: user_id.to_string(),
        jti: uuid::Uuid::new_v4().to_string(),
        exp: (Utc::now() + Duration::days(ttl_days)).timestamp(),
    };
    jwt::encode(&claims, secret.as_bytes()).map_err(|e| {
        error!(user_id, error=%e, "issue_token: jwt encode failed");
        AppError::internal(e)
    })
}
