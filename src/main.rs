use std::{io::ErrorKind, net::SocketAddr, sync::Arc};

use anyhow::Context;
use dotenv::dotenv;

use axum::{
    extract::DefaultBodyLimit,
    http::{Request, Uri},
    middleware::Next,
    response::Response,
    routing::{get, get_service, post},
    Router,
};
use tower_http::{
    compression::{
        predicate::{DefaultPredicate, NotForContentType, Predicate},
        CompressionLayer,
    },
    services::ServeFile,
    trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::env_utils::Settings;
use crate::record_store::RecordStore;
use crate::route_handlers::{not_found, storage_guard};

mod dashboard;
mod env_utils;
mod error;
mod record_store;
mod route_handlers;
mod utils;

#[derive(Clone)]
pub struct AppState {
    store: Arc<RecordStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!("initializing app state ...");

    let settings = Settings::from_env();
    let store = RecordStore::open(&settings.data_dir)
        .await
        .with_context(|| {
            format!(
                "failed to initialize data file in {}",
                settings.data_dir.display()
            )
        })?;
    tracing::info!("Storing webhooks in {}", store.path().display());
    let state = AppState {
        store: Arc::new(store),
    };

    let addr = format!("[::]:{}", settings.port)
        .parse::<SocketAddr>()
        .context("unable to parse address")?;
    let listener = bind_listener(addr)?;
    let host_uri = env_utils::get_host_uri(settings.port);

    tracing::info!("Starting server at host: {}", host_uri);
    tracing::info!("Webhook URL: {}/webhook", host_uri);

    let predicate = DefaultPredicate::new().and(NotForContentType::new("application/json"));
    let compression_layer = CompressionLayer::new().gzip(true).compress_when(predicate);

    axum::Server::from_tcp(listener)
        .context("unable to use listening socket")?
        .serve(
            get_main_router(state, &settings)
                .layer(axum::middleware::from_fn(uri_middleware))
                .layer(TraceLayer::new_for_http().on_response(
                    |response: &Response, latency: std::time::Duration, _span: &Span| {
                        let url = match response.extensions().get::<RequestUri>().map(|r| &r.0) {
                            Some(uri) => uri.to_string(),
                            None => "unknown".to_string(),
                        };
                        let status = response.status();
                        let latency = utils::duration_to_ms_string(latency);

                        if url == "/healthcheck" {
                            tracing::trace!("{} {} {}", url, status, latency);
                            return;
                        }

                        tracing::debug!("{} {} {}", url, status, latency);
                    },
                ))
                .layer(compression_layer)
                .into_make_service(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("error while starting API server")?;

    tracing::info!("Server stopped");

    Ok(())
}

fn bind_listener(addr: SocketAddr) -> anyhow::Result<std::net::TcpListener> {
    std::net::TcpListener::bind(addr).map_err(|err| {
        match err.kind() {
            ErrorKind::PermissionDenied => tracing::error!(
                "Port {} needs elevated privileges, run as a privileged user or set PORT to an unprivileged port such as 8080",
                addr.port()
            ),
            ErrorKind::AddrInUse => tracing::error!(
                "Port {} is already in use, stop the other process or set PORT",
                addr.port()
            ),
            _ => tracing::error!("Failed to bind {}: {}", addr, err),
        }
        anyhow::Error::new(err).context(format!("failed to bind {addr}"))
    })
}

/**
 * main router for the app: the webhook intake, the dashboard page and its assets,
 * the json api. Anything under the storage prefix is refused before routing.
 **/
fn get_main_router(state: AppState, settings: &Settings) -> Router {
    tracing::debug!("initializing router(s) ...");

    let services_router = get_services_router(settings);
    let api_router = get_api_router();
    Router::new()
        .route(
            "/",
            get(route_handlers::home::handler).fallback(not_found::handler),
        )
        .route(
            "/webhook",
            post(route_handlers::webhooks::handler).fallback(not_found::handler),
        )
        .route(
            "/healthcheck",
            get(route_handlers::health::healthcheck_handler).fallback(not_found::handler),
        )
        .merge(services_router)
        .merge(api_router)
        .fallback(not_found::handler)
        .layer(axum::middleware::from_fn(storage_guard::deny_storage_paths))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .with_state(state)
}

/**
 * router for the two dashboard assets, each mapped to exactly one file
**/
fn get_services_router(settings: &Settings) -> Router<AppState> {
    let styles_path = settings.assets_dir.join("styles.css");
    let script_path = settings.assets_dir.join("script.js");

    Router::new()
        .route(
            "/styles.css",
            get_service(ServeFile::new(styles_path)).fallback(not_found::handler),
        )
        .route(
            "/script.js",
            get_service(ServeFile::new(script_path)).fallback(not_found::handler),
        )
}

/**
 * router for the json api the dashboard polls
 **/
fn get_api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/data",
            get(route_handlers::api_data::handler).fallback(not_found::handler),
        )
        .route(
            "/api/test",
            get(route_handlers::health::api_test_handler).fallback(not_found::handler),
        )
}

struct RequestUri(Uri);

async fn uri_middleware<B>(request: Request<B>, next: Next<B>) -> Response {
    let uri = request.uri().clone();

    let mut response = next.run(request).await;

    response.extensions_mut().insert(RequestUri(uri));

    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Method, StatusCode},
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::record_store::DATA_FILE_NAME;

    struct TestApp {
        router: Router,
        data_dir: PathBuf,
        _dir: TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let settings = Settings {
            port: 0,
            data_dir: data_dir.clone(),
            assets_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets"),
            max_body_bytes: 1024,
        };
        let store = RecordStore::open(&settings.data_dir).await.unwrap();
        let state = AppState {
            store: Arc::new(store),
        };

        TestApp {
            router: get_main_router(state, &settings),
            data_dir,
            _dir: dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn webhook_is_stored_and_listed() {
        let app = test_app().await;

        let (status, body) = send(&app.router, post_json("/webhook", r#"{"foo":"bar"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let ack: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(ack["success"], json!(true));
        assert!(ack["message"].is_string());
        let timestamp = ack["timestamp"].as_str().unwrap().to_string();

        let (status, body) = send(&app.router, get_request("/api/data")).await;
        assert_eq!(status, StatusCode::OK);
        let records: Value = serde_json::from_str(&body).unwrap();
        let records = records.as_array().unwrap();
        assert_eq!(
            records.last().unwrap(),
            &json!({"timestamp": timestamp, "data": {"foo": "bar"}})
        );
    }

    #[tokio::test]
    async fn api_data_lists_oldest_first() {
        let app = test_app().await;
        for n in 1..=3 {
            let (status, _) = send(&app.router, post_json("/webhook", n.to_string())).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = send(&app.router, get_request("/api/data")).await;
        let records: Vec<Value> = serde_json::from_str(&body).unwrap();
        let payloads: Vec<Value> = records.iter().map(|r| r["data"].clone()).collect();
        assert_eq!(payloads, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn empty_history_renders_empty_state() {
        let app = test_app().await;

        let (status, body) = send(&app.router, get_request("/api/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!([]));

        let (status, page) = send(&app.router, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("No webhooks received yet"));
        assert!(page.contains("<code>/webhook</code>"));
        assert!(!page.contains("<table>"));
    }

    #[tokio::test]
    async fn dashboard_lists_newest_first() {
        let app = test_app().await;
        for payload in [r#""alpha""#, r#""bravo""#, r#""charlie""#] {
            send(&app.router, post_json("/webhook", payload)).await;
        }

        let (status, page) = send(&app.router, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("<table>"));
        assert!(page.contains(r#"<span id="totalCount">3</span>"#));
        let newest = page.find("charlie").unwrap();
        let middle = page.find("bravo").unwrap();
        let oldest = page.find("alpha").unwrap();
        assert!(newest < middle && middle < oldest);
    }

    #[tokio::test]
    async fn dashboard_escapes_payloads() {
        let app = test_app().await;
        send(&app.router, post_json("/webhook", r#""<script>alert(1)</script>""#)).await;

        let (_, page) = send(&app.router, get_request("/")).await;
        assert!(!page.contains("<script>alert(1)</script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_webhooks_are_all_kept() {
        let app = test_app().await;

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let router = app.router.clone();
                tokio::spawn(async move {
                    router
                        .oneshot(post_json("/webhook", json!({ "n": n }).to_string()))
                        .await
                        .unwrap()
                        .status()
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }

        let (_, body) = send(&app.router, get_request("/api/data")).await;
        let records: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(records.len(), 16);
    }

    #[tokio::test]
    async fn storage_directory_is_forbidden() {
        let app = test_app().await;
        send(&app.router, post_json("/webhook", r#"{"secret":"value"}"#)).await;

        let (status, body) = send(&app.router, get_request("/data/webhooks_data.json")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.contains("secret"));
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error, json!({"success": false, "error": "Access denied"}));

        for uri in ["/data", "/data/", "/data/anything/else"] {
            let (status, _) = send(&app.router, get_request(uri)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        }

        let (status, _) = send(&app.router, post_json("/data/webhooks_data.json", "[]")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unmatched_paths_get_uniform_json_404() {
        let app = test_app().await;

        for (method, uri) in [
            (Method::GET, "/nope"),
            (Method::GET, "/api/nope"),
            (Method::GET, "/webhook"),
            (Method::DELETE, "/api/data"),
            (Method::POST, "/styles.css"),
        ] {
            let request = Request::builder()
                .method(method.clone())
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, body) = send(&app.router, request).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            let error: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(
                error,
                json!({
                    "success": false,
                    "error": "Not found",
                    "path": uri,
                    "method": method.as_str(),
                })
            );
        }
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_and_not_stored() {
        let app = test_app().await;

        let (status, body) = send(&app.router, post_json("/webhook", "{broken")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["success"], json!(false));
        assert!(error["message"].is_string());

        let (_, body) = send(&app.router, get_request("/api/data")).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn empty_body_is_stored_as_empty_object() {
        let app = test_app().await;

        let (status, _) = send(&app.router, post_json("/webhook", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app.router, get_request("/api/data")).await;
        let records: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(records[0]["data"], json!({}));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = test_app().await;
        let big = format!("\"{}\"", "x".repeat(4096));

        let (status, body) = send(&app.router, post_json("/webhook", big)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["success"], json!(false));
    }

    #[tokio::test]
    async fn failed_write_is_reported_to_sender() {
        let app = test_app().await;
        std::fs::create_dir(app.data_dir.join(DATA_FILE_NAME).with_extension("json.tmp")).unwrap();

        let (status, body) = send(&app.router, post_json("/webhook", r#"{"a":1}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["success"], json!(false));
        assert_eq!(error["error"], json!("Failed to store webhook"));
    }

    #[tokio::test]
    async fn unreadable_store_is_a_server_error() {
        let app = test_app().await;
        let data_file = app.data_dir.join(DATA_FILE_NAME);
        std::fs::remove_file(&data_file).unwrap();
        std::fs::create_dir(&data_file).unwrap();

        let (status, body) = send(&app.router, get_request("/api/data")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(error["error"], json!("Failed to load data"));
        let data_dir = app.data_dir.display().to_string();
        assert!(!body.contains(&data_dir));

        let (status, page) = send(&app.router, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("Failed to load data"));
        assert!(!page.contains(&data_dir));
    }

    #[tokio::test]
    async fn static_assets_are_served() {
        let app = test_app().await;

        let response = app
            .router
            .clone()
            .oneshot(get_request("/styles.css"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/css"));

        let (status, script) = send(&app.router, get_request("/script.js")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(script.contains("setAutoRefresh"));
    }

    #[tokio::test]
    async fn health_endpoints_respond() {
        let app = test_app().await;

        let (status, body) = send(&app.router, get_request("/api/test")).await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], json!("ok"));
        assert!(health["timestamp"].is_string());

        let (status, body) = send(&app.router, get_request("/healthcheck")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Ok");
    }
}
