use actix_web::{HttpResponse, http, web};

use crate::config::Config;

/// Body of `/nix-cache-info`.
pub fn render(config: &Config) -> String {
    format!(
        "StoreDir: {}\nWantMassQuery: 1\nPriority: {}\n",
        config.store_dir, config.priority
    )
}

pub(crate) async fn get(config: web::Data<Config>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((http::header::CONTENT_TYPE, "text/x-nix-cache-info"))
        .body(render(&config))
}
