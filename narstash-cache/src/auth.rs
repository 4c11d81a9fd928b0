use actix_web::HttpRequest;
use actix_web::http::header;

use crate::config::Config;
use crate::error::AuthError;

/// Check the request's bearer token against the configured upload token.
pub(crate) fn require_upload(req: &HttpRequest, config: &Config) -> Result<(), AuthError> {
    let Some(expected) = config.upload_token.as_deref() else {
        return Err(AuthError::UploadsDisabled);
    };
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    if constant_time_eq(provided.trim().as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
