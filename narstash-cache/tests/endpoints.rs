use actix_web::http::{Method, StatusCode, header};
use actix_web::{App, test, web};
use narstash_cache::{Config, routes};
use narstash_storage::config::{LocalConfig, StorageConfig};
use narstash_storage::{Backend, StorageBackend};
use narstash_store_core::SigningKey;
use narstash_store_core::narinfo::parse_record;
use tempfile::TempDir;

const HASH: &str = "26xbg1ndr7hbcncrlf9nhx5is2b25d13";
const TOKEN: &str = "upload-secret";

fn narinfo() -> String {
    format!(
        "StorePath: /nix/store/{HASH}-hello-2.12.1\nURL: nar/1mkvday29m2qxg1fnbv8xh9s6151bh8a2xzhh0k86j7lqhyfwibh.nar\nCompression: none\nNarHash: sha256:1mkvday29m2qxg1fnbv8xh9s6151bh8a2xzhh0k86j7lqhyfwibh\nNarSize: 11\nReferences: \n"
    )
}

async fn backend(dir: &TempDir) -> Backend {
    Backend::open(&StorageConfig::Local(LocalConfig {
        root: dir.path().to_path_buf(),
    }))
    .await
    .unwrap()
}

fn config(token: Option<&str>, key: Option<SigningKey>) -> Config {
    Config {
        priority: 40,
        upload_token: token.map(str::to_string),
        secret_key: key,
        ..Config::default()
    }
}

macro_rules! app {
    ($config:expr, $backend:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($config))
                .app_data(web::Data::new($backend))
                .configure(routes),
        )
        .await
    };
}

fn header_value<'a>(resp: &'a actix_web::dev::ServiceResponse, name: header::HeaderName) -> &'a str {
    resp.headers().get(name).unwrap().to_str().unwrap()
}

#[actix_web::test]
async fn test_root_endpoint() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(None, None), backend(&dir).await);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header_value(&resp, header::CONTENT_TYPE).starts_with("text/html"));

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("narstash-cache"));
    assert!(body.contains("priority=40"));
}

#[actix_web::test]
async fn test_nix_cache_info() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(None, None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/nix-cache-info").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_value(&resp, header::CONTENT_TYPE), "text/x-nix-cache-info");
    assert_eq!(
        test::read_body(resp).await,
        "StoreDir: /nix/store\nWantMassQuery: 1\nPriority: 40\n"
    );
}

#[actix_web::test]
async fn test_missing_narinfo() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(None, None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/{HASH}.narinfo"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(header_value(&resp, header::CACHE_CONTROL), "no-store");

    let resp = test::call_service(
        &app,
        test::TestRequest::default()
            .method(Method::HEAD)
            .uri(&format!("/{HASH}.narinfo"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_malformed_hash_not_routed() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(None, None), backend(&dir).await);

    for uri in ["/abc.narinfo", "/26xbg1ndr7hbcncrlf9nhx5is2b25d1e.narinfo"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[actix_web::test]
async fn test_upload_refused_without_configured_token() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(None, None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/{HASH}.narinfo"))
            .insert_header((header::AUTHORIZATION, format!("Bearer {TOKEN}")))
            .set_payload(narinfo())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_upload_with_wrong_token() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(Some(TOKEN), None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/{HASH}.narinfo"))
            .insert_header((header::AUTHORIZATION, "Bearer nope"))
            .set_payload(narinfo())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header_value(&resp, header::WWW_AUTHENTICATE), "Bearer");

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/{HASH}.narinfo"))
            .set_payload(narinfo())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_narinfo_upload_is_signed_and_served() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::generate("cache.example.org-1").unwrap();
    let app = app!(
        config(Some(TOKEN), Some(key.clone())),
        backend(&dir).await
    );

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/{HASH}.narinfo"))
            .insert_header((header::AUTHORIZATION, format!("Bearer {TOKEN}")))
            .set_payload(narinfo())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::default()
            .method(Method::HEAD)
            .uri(&format!("/{HASH}.narinfo"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/{HASH}.narinfo"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_value(&resp, header::CONTENT_TYPE), "text/x-nix-narinfo");
    assert_eq!(header_value(&resp, header::CACHE_CONTROL), "max-age=86400");

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.starts_with(&narinfo()));
    let record = parse_record(&body).unwrap();
    assert!(
        key.public_key()
            .verify_record(&record, record.signature.as_deref().unwrap())
    );
}

#[actix_web::test]
async fn test_malformed_narinfo_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(Some(TOKEN), None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/{HASH}.narinfo"))
            .insert_header((header::AUTHORIZATION, format!("Bearer {TOKEN}")))
            .set_payload("StorePath: /nix/store/x\nNarSize: lots\n")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_nar_upload_and_download() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(Some(TOKEN), None), backend(&dir).await);
    let uri = "/nar/1mkvday29m2qxg1fnbv8xh9s6151bh8a2xzhh0k86j7lqhyfwibh.nar";

    let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(uri)
            .insert_header((header::AUTHORIZATION, format!("Bearer {TOKEN}")))
            .set_payload("nar content")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::default()
            .method(Method::HEAD)
            .uri(uri)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_value(&resp, header::CONTENT_TYPE), "application/x-nix-nar");
    assert_eq!(header_value(&resp, header::CACHE_CONTROL), "max-age=31536000");
    assert_eq!(test::read_body(resp).await, "nar content");
}

#[actix_web::test]
async fn test_nar_upload_requires_token() {
    let dir = TempDir::new().unwrap();
    let storage = backend(&dir).await;
    let app = app!(config(Some(TOKEN), None), storage);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri("/nar/x.nar")
            .set_payload("nar content")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let check = backend(&dir).await;
    assert!(!check.has_nar("x.nar").await.unwrap());
}

#[actix_web::test]
async fn test_hidden_nar_name_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app!(config(Some(TOKEN), None), backend(&dir).await);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/nar/.x.nar").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
