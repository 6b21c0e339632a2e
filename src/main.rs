use std::sync::Arc;

use actix_web::{middleware::Compress, web, App, HttpServer};
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use perch::config::AppConfig;
use perch::repo::Repo;
use perch::{AppState, SecurityHeaders, SessionKey, SessionLayer};

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use sqlx::postgres::PgPoolOptions;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("applying migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(perch::repo::pg::PgRepo::new(pool)))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    info!("Using in-memory repository backend");
    Ok(Arc::new(perch::repo::inmem::InMemRepo::new()))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping perch");
    let cfg = AppConfig::from_env();
    if cfg.uses_default_secret() && !cfg!(debug_assertions) {
        warn!("release build running with the default SECRET_KEY");
    }
    info!(
        rate_limits = cfg.rate_limits.enabled,
        hsts = cfg.enable_hsts,
        secure_cookies = cfg.secure_cookies,
        "configuration loaded"
    );

    let repo = build_repo(&cfg).await?;
    let state = web::Data::new(AppState::new(repo).with_rate_limits(cfg.rate_limits.clone()));
    let session_key = SessionKey::new(&cfg.secret_key).with_secure_cookies(cfg.secure_cookies);
    let enable_hsts = cfg.enable_hsts;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(SessionLayer::new(session_key.clone()))
            .wrap(SecurityHeaders::default().with_hsts(enable_hsts))
            .wrap(Compress::default())
            .wrap(TracingLogger::default())
            .configure(perch::config)
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
