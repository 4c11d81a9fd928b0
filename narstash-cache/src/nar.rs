use actix_web::{HttpRequest, HttpResponse, http, web};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use narstash_storage::{Backend, NarStream, StorageBackend};
use std::io;

use crate::config::Config;
use crate::{ServerResult, auth, cache_control_max_age_1y, not_found, some_or_404};

const NAR_CONTENT_TYPE: &str = "application/x-nix-nar";

/// Chunks buffered between the request payload and the backend.
const UPLOAD_QUEUE_DEPTH: usize = 16;

pub(crate) async fn get(
    filename: web::Path<String>,
    backend: web::Data<Backend>,
) -> ServerResult {
    let stream = some_or_404!(backend.get_nar_stream(&filename).await?);

    Ok(HttpResponse::Ok()
        .insert_header((http::header::CONTENT_TYPE, NAR_CONTENT_TYPE))
        .insert_header(cache_control_max_age_1y())
        .streaming(stream))
}

pub(crate) async fn head(
    filename: web::Path<String>,
    backend: web::Data<Backend>,
) -> ServerResult {
    if !backend.has_nar(&filename).await? {
        return Ok(not_found());
    }
    Ok(HttpResponse::Ok()
        .insert_header((http::header::CONTENT_TYPE, NAR_CONTENT_TYPE))
        .insert_header(cache_control_max_age_1y())
        .finish())
}

pub(crate) async fn put(
    req: HttpRequest,
    filename: web::Path<String>,
    mut payload: web::Payload,
    config: web::Data<Config>,
    backend: web::Data<Backend>,
) -> ServerResult {
    auth::require_upload(&req, &config)?;

    // The payload is tied to the worker thread, the backend wants a Send
    // stream. Forward chunks through a bounded channel.
    let (mut tx, rx) = mpsc::channel::<io::Result<web::Bytes>>(UPLOAD_QUEUE_DEPTH);
    let forward = async move {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| io::Error::other(e.to_string()));
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    };
    let stream: NarStream = rx.boxed();

    let ((), stored) = futures::join!(forward, backend.put_nar_stream(&filename, stream));
    stored?;
    log::info!("stored NAR {filename}");

    Ok(HttpResponse::NoContent().finish())
}
