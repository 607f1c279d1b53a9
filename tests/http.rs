//! Site pages served through the axum router.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use sitekit::class::{ClassCatalog, ClassDef};
use sitekit::config::ConfigValue;
use sitekit::extractors::tenant::SITE_ID_HEADER;
use sitekit::tenant::SINGLETON_KEY;
use sitekit::{common_routes, site_routes, AppState, FactoryOptions, InstanceRegistry};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn app(dir: &TempDir) -> (Router, AppState) {
    app_with(dir, InstanceRegistry::new)
}

fn app_with(dir: &TempDir, registry: impl FnOnce(FactoryOptions) -> InstanceRegistry) -> (Router, AppState) {
    fs::write(dir.path().join("one.hbs"), "{{site.tenant}}:{{thing.title}}").unwrap();
    fs::write(dir.path().join("frontpage.hbs"), "front").unwrap();
    fs::write(dir.path().join("notfound.hbs"), "missing").unwrap();
    fs::write(dir.path().join("login.hbs"), "login").unwrap();
    let mut catalog = ClassCatalog::new();
    catalog.define(ClassDef::new("music::Cd", "cd", &["title"]));
    let defaults = FactoryOptions::new(Arc::new(catalog))
        .set("class", ConfigValue::List(vec!["music::Cd".into()]))
        .set("template_root", ConfigValue::Scalar(dir.path().to_string_lossy().into_owned()))
        .set("restricted_op", ConfigValue::List(vec!["delete".into()]));
    let state = AppState::new(registry(defaults));
    let router = Router::new().merge(common_routes()).merge(site_routes(state.clone()));
    (router, state)
}

async fn body_text(res: axum::response::Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_is_served_beside_sites() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(&dir);
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_text(res).await, r#"{"status":"ok"}"#);
}

#[tokio::test]
async fn form_posts_store_objects_for_the_named_site() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app(&dir);
    let req = Request::builder()
        .method("POST")
        .uri("/cd/new")
        .header(SITE_ID_HEADER, "jazz")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("op=store&title=Blue+Train"))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert_eq!(body_text(res).await, "jazz:Blue Train");
    assert_eq!(state.registry.tenants(), vec!["jazz".to_string()]);
}

#[tokio::test]
async fn host_names_select_the_site() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app(&dir);
    let req = Request::builder()
        .uri("/cd/new?op=store&title=Giant%20Steps")
        .header(header::HOST, "rock.example:3000")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(body_text(res).await, "rock.example:Giant Steps");
    assert!(state.registry.get("rock.example").is_some());
}

#[tokio::test]
async fn unknown_paths_are_site_not_found_pages() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(&dir);
    let req = Request::builder()
        .uri("/lp/1")
        .header(SITE_ID_HEADER, "jazz")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(res).await, "missing");
}

#[tokio::test]
async fn cookies_naming_a_user_do_not_sign_in() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app(&dir);
    let site = state.registry.instance(Some("jazz")).await.unwrap();
    let fields = serde_json::json!({"title": "Keep"}).as_object().cloned().unwrap();
    let id = site.create("cd", fields).await.unwrap().unwrap().id;
    let req = Request::builder()
        .uri(format!("/cd/{}?op=delete", id))
        .header(SITE_ID_HEADER, "jazz")
        .header(header::COOKIE, "sitekit_session=admin")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(res).await, "login");
    assert_eq!(site.count_all("cd").await.unwrap(), 1);
}

#[tokio::test]
async fn unlisted_site_ids_share_the_default_site() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app_with(&dir, |defaults| InstanceRegistry::new(defaults).with_sites(["jazz"]));
    for i in 0..25 {
        let req = Request::builder()
            .uri("/")
            .header(SITE_ID_HEADER, format!("junk-{}", i))
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(state.registry.tenants(), vec![SINGLETON_KEY.to_string()]);
}
