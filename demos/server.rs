//! Demo server: one process serving every site named in SITEKIT_SITE_DIR,
//! with the common routes beside a fallback that renders site pages.

use axum::Router;
use sitekit::{
    common_routes, site_routes, AppState, ClassCatalog, ClassDef, FactoryOptions, InstanceRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn catalog() -> ClassCatalog {
    let mut catalog = ClassCatalog::new();
    catalog
        .define(
            ClassDef::new("music::Cd", "cd", &["title", "artist", "year"])
                .title("CD", "CDs")
                .sql_type("year", "integer")
                .essential(&["id", "title", "artist"]),
        )
        .define(
            ClassDef::new("music::Album", "album", &["title", "label"])
                .description("Albums, whatever the medium"),
        )
        .define(ClassDef::new("music::Artist", "artist", &["name", "country"]).moniker("artist"));
    catalog
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sitekit=info".parse()?))
        .init();

    let config = std::env::var("SITEKIT_CONFIG").unwrap_or_else(|_| "demos/site/site.conf".into());
    let site_dir = std::env::var("SITEKIT_SITE_DIR").unwrap_or_else(|_| "demos/site/sites".into());
    let addr = std::env::var("SITEKIT_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let defaults = FactoryOptions::new(Arc::new(catalog())).source(PathBuf::from(config));
    let registry = InstanceRegistry::new(defaults).with_site_config_dir(site_dir);
    let state = AppState::new(registry);

    let app = Router::new()
        .merge(common_routes())
        .merge(site_routes(state));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
