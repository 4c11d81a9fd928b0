#![warn(clippy::dbg_macro)]

//! HTTP endpoint and maintenance commands for a Nix binary cache whose
//! narinfo records and NAR files live in a [`narstash_storage::Backend`].

use actix_web::{HttpResponse, http, web};
use error::{AuthError, CacheError, ServerError};
use narstash_storage::StorageError;
use narstash_store_core::NarInfoError;
use std::fmt::Display;

mod auth;
mod cacheinfo;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
mod nar;
mod narinfo;
mod root;
mod template;

pub use config::Config;

const CARGO_NAME: &str = env!("CARGO_PKG_NAME");
const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_HOME_PAGE: &str = env!("CARGO_PKG_HOMEPAGE");
const NIXBASE32_ALPHABET: &str = "0123456789abcdfghijklmnpqrsvwxyz";

fn cache_control_max_age(max_age: u32) -> http::header::CacheControl {
    http::header::CacheControl(vec![http::header::CacheDirective::MaxAge(max_age)])
}

fn cache_control_max_age_1y() -> http::header::CacheControl {
    cache_control_max_age(365 * 24 * 60 * 60)
}

fn cache_control_max_age_1d() -> http::header::CacheControl {
    cache_control_max_age(24 * 60 * 60)
}

fn cache_control_no_store() -> http::header::CacheControl {
    http::header::CacheControl(vec![http::header::CacheDirective::NoStore])
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .insert_header(cache_control_no_store())
        .body("missed hash")
}

macro_rules! some_or_404 {
    ($res:expr) => {
        match $res {
            Some(val) => val,
            None => return Ok(crate::not_found()),
        }
    };
}
pub(crate) use some_or_404;

#[derive(Debug)]
struct HttpError {
    err: CacheError,
}

impl Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for HttpError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match &self.err {
            CacheError::Storage(StorageError::InvalidKey { .. }) => StatusCode::BAD_REQUEST,
            CacheError::Storage(e) if e.is_remote() => StatusCode::BAD_GATEWAY,
            CacheError::NarInfo(_) => StatusCode::BAD_REQUEST,
            CacheError::Server(ServerError::Payload { .. }) => StatusCode::BAD_REQUEST,
            CacheError::Auth(AuthError::UploadsDisabled) => StatusCode::FORBIDDEN,
            CacheError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self.err);
        }
        let mut response = HttpResponse::build(status);
        response.insert_header(cache_control_no_store());
        if let CacheError::Auth(AuthError::MissingToken | AuthError::InvalidToken) = &self.err {
            response.insert_header((http::header::WWW_AUTHENTICATE, "Bearer"));
        }
        response.body(format!("{}\n", self.err))
    }
}

impl From<CacheError> for HttpError {
    fn from(err: CacheError) -> HttpError {
        HttpError { err }
    }
}

macro_rules! http_error_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for HttpError {
            fn from(err: $ty) -> HttpError {
                HttpError { err: err.into() }
            }
        })*
    };
}

http_error_from!(StorageError, AuthError, ServerError, NarInfoError);

type ServerResult = std::result::Result<HttpResponse, HttpError>;

/// Register every route. Expects `web::Data<Config>` and
/// `web::Data<Backend>` as app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
    let narinfo_path = format!("/{{hash:[{NIXBASE32_ALPHABET}]{{32}}}}.narinfo");
    cfg.route("/", web::get().to(root::get))
        .route("/nix-cache-info", web::get().to(cacheinfo::get))
        .route(&narinfo_path, web::get().to(narinfo::get))
        .route(&narinfo_path, web::head().to(narinfo::head))
        .route(&narinfo_path, web::put().to(narinfo::put))
        .route("/nar/{filename}", web::get().to(nar::get))
        .route("/nar/{filename}", web::head().to(nar::head))
        .route("/nar/{filename}", web::put().to(nar::put));
}
