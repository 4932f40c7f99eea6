use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Compress, web};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pitchlink::api::health::AppStartTime;
use pitchlink::api::{api_routes, health::health_routes};
use pitchlink::config::{ServerConfig, get_config, init_config};
use pitchlink::services::{
    AnalyticsService, ChainWalker, IngestService, ReferralService, owner_lookup_from_config,
};
use pitchlink::storage::{SeaOrmStorage, infer_backend_from_url};
use pitchlink::tracking::global::set_global_aggregate_manager;
use pitchlink::tracking::manager::AggregateManager;

fn build_cors(server: &ServerConfig) -> Cors {
    if !server.cors_enabled {
        return Cors::default();
    }

    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "DELETE"])
        .allowed_header("Content-Type")
        .max_age(3600);

    if server.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_any_origin();
    } else if server.allowed_origins.is_empty() {
        warn!("CORS enabled but allowed_origins is empty, only same-origin requests will pass");
    } else {
        for origin in &server.allowed_origins {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let app_start_time = AppStartTime {
        start_datetime: chrono::Utc::now(),
    };

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = init_config();

    let backend = infer_backend_from_url(&config.database.url)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let storage = Arc::new(
        SeaOrmStorage::new(&config.database.url, &backend)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?,
    );
    info!("Using storage backend: {}", storage.get_backend_name());

    // 聚合缓冲 + 后台定时刷盘
    let manager = AggregateManager::new(
        storage.as_aggregate_sink(),
        Duration::from_secs(config.tracking.flush_interval_secs),
        config.tracking.max_deltas_before_flush,
    );
    set_global_aggregate_manager(Arc::new(manager.clone()));
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager.start_background_task().await;
        });
    }

    let owner_lookup = owner_lookup_from_config();
    let walker = Arc::new(ChainWalker::new(Arc::clone(&storage)));
    let referral_service = Arc::new(ReferralService::new(
        Arc::clone(&storage),
        Arc::clone(&walker),
        Arc::clone(&owner_lookup),
    ));
    let ingest_service = Arc::new(IngestService::new(
        Arc::clone(&storage),
        Arc::clone(&walker),
        Arc::clone(&owner_lookup),
        manager.clone(),
    ));
    let analytics_service = Arc::new(AnalyticsService::new(Arc::clone(&storage)));

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting server at http://{}", bind_address);

    let server_config = config.server.clone();
    let storage_for_app = Arc::clone(&storage);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&server_config))
            .wrap(Compress::default())
            .app_data(web::Data::new(Arc::clone(&storage_for_app)))
            .app_data(web::Data::new(Arc::clone(&referral_service)))
            .app_data(web::Data::new(Arc::clone(&ingest_service)))
            .app_data(web::Data::new(Arc::clone(&analytics_service)))
            .app_data(web::Data::new(app_start_time.clone()))
            .app_data(web::PayloadConfig::new(64 * 1024))
            .service(web::scope("/health").service(health_routes()))
            .service(api_routes())
    })
    .keep_alive(Duration::from_secs(30))
    .bind(bind_address)?
    .run();

    server.await?;

    // 停机前把缓冲里的增量刷掉
    info!("Server stopped, flushing pending aggregation deltas");
    manager.flush().await;

    Ok(())
}
