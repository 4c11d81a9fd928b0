use std::collections::HashMap;

use actix_web::{HttpRequest, HttpResponse, http, web};
use askama_escape::{Html, escape as escape_html_entity};
use narstash_storage::Backend;

use crate::config::Config;
use crate::template::{LANDING_TEMPLATE, render, render_page};
use crate::{CARGO_HOME_PAGE, CARGO_NAME, CARGO_VERSION};

/// The landing page, advertising `url` as the substituter address.
pub fn render_landing(config: &Config, backend: &Backend, url: &str) -> String {
    let public_key = config
        .secret_key
        .as_ref()
        .map(|k| k.public_key().to_text())
        .unwrap_or_else(|| "<unsigned>".to_string());

    let mut vars = HashMap::new();
    vars.insert("version", CARGO_VERSION.to_string());
    vars.insert("homepage", CARGO_HOME_PAGE.to_string());
    vars.insert("name", CARGO_NAME.to_string());
    vars.insert("url", escape_html_entity(url, Html).to_string());
    vars.insert("public_key", escape_html_entity(&public_key, Html).to_string());
    vars.insert("store", escape_html_entity(&config.store_dir, Html).to_string());
    vars.insert("priority", config.priority.to_string());
    vars.insert("storage", backend.kind().to_string());

    let content = render(LANDING_TEMPLATE, vars);
    render_page(
        &format!("Nix Binary Cache - {CARGO_NAME} {CARGO_VERSION}"),
        &content,
    )
}

pub(crate) async fn get(
    req: HttpRequest,
    config: web::Data<Config>,
    backend: web::Data<Backend>,
) -> HttpResponse {
    let info = req.connection_info();
    let url = format!("{}://{}", info.scheme(), info.host());

    HttpResponse::Ok()
        .insert_header(http::header::ContentType(mime::TEXT_HTML_UTF_8))
        .body(render_landing(&config, &backend, &url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use narstash_storage::config::{LocalConfig, StorageConfig};
    use tempfile::TempDir;

    #[actix_web::test]
    async fn test_landing_escapes_interpolated_values() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(&StorageConfig::Local(LocalConfig {
            root: dir.path().to_path_buf(),
        }))
        .await
        .unwrap();
        let config = Config {
            store_dir: "/nix/<store>".into(),
            ..Config::default()
        };

        let page = render_landing(&config, &backend, "http://cache\"x");

        assert!(page.contains("/nix/&"));
        assert!(!page.contains("<store>"));
        assert!(!page.contains("<unsigned>"));
        assert!(!page.contains("cache\"x"));
    }
}
