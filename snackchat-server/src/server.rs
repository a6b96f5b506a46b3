use app_state::AppState;
use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use routes::openapi::openapi_routes;
use shared::config::server::{Config, DatabaseConfig, LogFormat, StoreBackend};
use sqlx::postgres::PgPoolOptions;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state,
    db::bootstrap,
    middleware::request_context::{self, RequestIdState},
    routes, tracer,
};
use axum::http::{HeaderValue, Method, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. The recorder is installed on first use.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("a metrics recorder is already installed; /metrics will be empty");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber using the provided configuration.
///
/// A subscriber installed earlier (by a test harness, for instance) is
/// left in place.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
#[allow(clippy::cast_precision_loss)]
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    metrics::gauge!("db_statement_timeout_ms").set(db.statement_timeout_ms as f64);
    Ok(pool)
}

/// Wires the application state for `config`.
pub fn create_app_state(config: Arc<Config>, pool: Option<sqlx::PgPool>) -> Arc<AppState> {
    Arc::new(AppState::from_config(config, pool))
}

/// Creates the CORS layer applied to the `/api` routes.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let methods = vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Routes nested under `/api`.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(routes::chat::create_router_chat())
        .merge(routes::push::create_router_push())
}

/// Creates the main application router with all middleware and routes.
///
/// The grant endpoint is merged beside the `/api` nest so that it keeps its
/// own CORS headers.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api", create_api_router().layer(cors))
        .merge(routes::realtime::create_router_realtime())
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .layer(Extension(metrics_handle))
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves when the process receives Ctrl+C.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the relay server.
///
/// # Errors
/// Returns an error if the database is unreachable, bootstrap fails, or the
/// listener cannot bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let pool = if config.store.backend == StoreBackend::Postgres {
        let pool = create_database_pool(&config.db).await?;
        bootstrap::ensure_liveness(&pool).await?;
        bootstrap::run(&pool).await?;
        bootstrap::ensure_readiness(&pool).await?;
        Some(pool)
    } else {
        info!("using in-memory message store; history is lost on restart");
        None
    };

    let state = create_app_state(config.clone(), pool);
    let app = create_app_router(state, config.clone(), metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use shared::config::server::{Config, LogFormat, Profile};
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };
    use tracing::{Subscriber, info};
    use tracing_subscriber::fmt::{self, MakeWriter};

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(format: LogFormat) -> String {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = format;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = subscriber_with_writer(
            &config,
            BufferMakeWriter {
                buffer: buffer.clone(),
            },
        );
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);

        tracing::dispatcher::with_default(&dispatch, || {
            info!(message_id = "m-1", "chat message relayed");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap()
            .to_string()
    }

    fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let builder = fmt::fmt()
            .with_env_filter(super::build_env_filter(config))
            .with_target(false)
            .with_level(true)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(false).finish())
        }
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Dev);
        assert_eq!(initialize_tracing(&config), config.logging.level);
        // A second call must not panic.
        assert_eq!(initialize_tracing(&config), config.logging.level);
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let line = capture(LogFormat::Json);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["fields"]["message"], "chat message relayed");
        assert_eq!(value["fields"]["message_id"], "m-1");
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let line = capture(LogFormat::Text);
        assert!(serde_json::from_str::<Value>(&line).is_err());
        assert!(line.contains("chat message relayed"));
    }

    #[test]
    fn cors_layer_accepts_configured_origins() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.server.cors.allowed_origins = vec!["https://snack.example".into(), "\n".into()];
        // Unparsable origins are skipped rather than rejected.
        let _layer = create_cors_layer(&config);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        use axum::{
            body::{Body, to_bytes},
            http::Request,
        };
        use tower::ServiceExt;

        let handle = super::metrics_handle();
        metrics::counter!("chat_history_reads_total").increment(1);
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let state = create_app_state(config.clone(), None);

        let app = super::create_app_router(state, config, handle);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("chat_history_reads_total"));
    }
}
