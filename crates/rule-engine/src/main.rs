//! 资格规则引擎服务
//!
//! 提供规则管理与评估的 HTTP 接口。

use anyhow::Result;
use axum::http::HeaderValue;
use eligibility_shared::config::{AppConfig, StoreBackend};
use eligibility_shared::database::Database;
use eligibility_shared::observability;
use rule_engine::http::{self, AppState};
use rule_engine::{
    InMemoryRuleStore, InProcessTaskSubstrate, PgRuleStore, RuleEvaluationService, RuleResolver,
    RuleStore, job_handler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "rule-engine";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        backend = ?config.store.backend,
        "Starting rule-engine service..."
    );

    let store: Arc<dyn RuleStore> = match config.store.backend {
        StoreBackend::Memory => {
            if config.is_production() {
                error!("In-memory rule store configured in production, rules are lost on restart");
            } else {
                warn!("Using in-memory rule store, rules are lost on restart");
            }
            Arc::new(InMemoryRuleStore::new())
        }
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations().await?;
            info!("Database migrations applied");
            Arc::new(PgRuleStore::new(db.pool().clone()))
        }
    };

    let resolver = RuleResolver::new(store.clone());
    let substrate = InProcessTaskSubstrate::new(
        job_handler(resolver.clone()),
        config.task.worker_concurrency,
        Duration::from_secs(config.task.result_ttl_seconds),
    );
    let reaper = substrate.spawn_reaper(Duration::from_secs(config.task.reap_interval_seconds));
    info!(
        worker_concurrency = config.task.worker_concurrency,
        result_ttl_seconds = config.task.result_ttl_seconds,
        "Task substrate initialized"
    );

    let evaluation = RuleEvaluationService::new(resolver, Arc::new(substrate));
    let state = AppState::new(store, evaluation);

    let app = http::app(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_seconds,
        )))
        .layer(cors_layer());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    info!("Service shutdown complete");
    Ok(())
}

/// CORS 配置：通过 RULES_CORS_ORIGINS 控制允许的来源，"*" 表示全部
fn cors_layer() -> CorsLayer {
    let allowed_origins =
        std::env::var("RULES_CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());

    if allowed_origins == "*" {
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
