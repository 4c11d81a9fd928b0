use actix_web::{HttpRequest, HttpResponse, http, web};
use narstash_storage::{Backend, StorageBackend};
use narstash_store_core::NarInfoError;
use narstash_store_core::narinfo::{parse_record, resign};

use crate::config::Config;
use crate::error::ServerError;
use crate::{ServerResult, auth, cache_control_max_age_1d, not_found, some_or_404};

const NARINFO_CONTENT_TYPE: &str = "text/x-nix-narinfo";

pub(crate) async fn get(
    hash: web::Path<String>,
    backend: web::Data<Backend>,
) -> ServerResult {
    let narinfo = some_or_404!(backend.get_narinfo(&hash).await?);

    Ok(HttpResponse::Ok()
        .insert_header((http::header::CONTENT_TYPE, NARINFO_CONTENT_TYPE))
        .insert_header(cache_control_max_age_1d())
        .body(narinfo))
}

pub(crate) async fn head(
    hash: web::Path<String>,
    backend: web::Data<Backend>,
) -> ServerResult {
    if !backend.has_narinfo(&hash).await? {
        return Ok(not_found());
    }
    Ok(HttpResponse::Ok()
        .insert_header((http::header::CONTENT_TYPE, NARINFO_CONTENT_TYPE))
        .insert_header(cache_control_max_age_1d())
        .finish())
}

/// Check an uploaded narinfo and put it in canonical form.
///
/// The record must describe the store path named by `hash`. With a key
/// configured, every signature the uploader sent is replaced by ours.
pub fn prepare_upload(hash: &str, body: &str, config: &Config) -> Result<String, NarInfoError> {
    let record = parse_record(body)?;
    let name = record
        .store_path
        .rsplit_once('/')
        .map_or(record.store_path.as_str(), |(_, name)| name);
    if name.split_once('-').map(|(h, _)| h) != Some(hash) {
        return Err(NarInfoError::InvalidStorePath(format!(
            "{} does not match {hash}",
            record.store_path
        )));
    }

    match &config.secret_key {
        Some(key) => resign(body, key),
        None => Ok(body.to_string()),
    }
}

pub(crate) async fn put(
    req: HttpRequest,
    hash: web::Path<String>,
    body: web::Bytes,
    config: web::Data<Config>,
    backend: web::Data<Backend>,
) -> ServerResult {
    auth::require_upload(&req, &config)?;

    let text = std::str::from_utf8(&body).map_err(|e| ServerError::Payload {
        reason: format!("narinfo is not UTF-8: {e}"),
    })?;
    let narinfo = prepare_upload(&hash, text, &config)?;
    backend.put_narinfo(&hash, &narinfo).await?;
    log::info!("stored narinfo {hash}");

    Ok(HttpResponse::NoContent().finish())
}
