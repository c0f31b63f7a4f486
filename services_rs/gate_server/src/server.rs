use crate::config::Config;
use crate::error::ServeError;
use crate::handlers;
use crate::state::AppState;
use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::routing::{any, get};
use axum::Router;
use coursegate_common::access_gate::{AccessGateLayer, DropConnection};
use coursegate_common::bot_shield::{BanStore, BotShieldLayer};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Downstream routes behind BotShield (outermost) and the access gate.
pub fn build_app(cfg: &Config, bans: BanStore) -> Router {
    let state = AppState {
        env_name: cfg.env_name.clone(),
        base_url: cfg.base_url.clone(),
    };

    let static_dir = Path::new(&cfg.static_dir);
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api", any(handlers::api_not_found))
        .route("/api/*rest", any(handlers::api_not_found))
        .fallback_service(spa)
        .with_state(state)
        .layer(AccessGateLayer::new(cfg.access_gate()))
        .layer(BotShieldLayer::new(bans, cfg.trust_proxy))
        // Query strings can carry initData, so spans record the path only.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path
                )
            }),
        )
}

/// Accept loop that can honour [`DropConnection`] by closing the socket.
///
/// Each connection is served by hyper directly. A tagged response fails the
/// request and wakes the connection task, which drops the whole connection
/// (every HTTP/2 stream included) without writing a status line.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let app = app.clone();
        tokio::spawn(async move {
            let dropped = Arc::new(Notify::new());
            let signal = dropped.clone();
            let service = service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ConnectInfo(peer));
                let app = app.clone();
                let signal = signal.clone();
                async move {
                    let resp = app.oneshot(req).await.unwrap_or_else(|never| match never {});
                    if resp.extensions().get::<DropConnection>().is_some() {
                        signal.notify_one();
                        return Err(ServeError::ConnectionDropped);
                    }
                    Ok(resp)
                }
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        tracing::debug!(error = %e, %peer, "connection closed");
                    }
                }
                () = dropped.notified() => {
                    tracing::debug!(%peer, "connection dropped");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use coursegate_common::access_gate::AccessGateConfig;
    use http_body_util::Empty;
    use hyper::body::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn gated_app() -> Router {
        Router::new()
            .route("/tg", get(|| async { "mini app" }))
            .fallback(|| async { StatusCode::NOT_FOUND.into_response() })
            .layer(AccessGateLayer::new(AccessGateConfig {
                enabled: true,
                bot_token: Some("123456:AAbbCCddEEffGGhhIIjjKKllMMnnOOppQQ".to_string()),
                init_data_max_age_secs: Some(900),
                production: false,
                trust_forwarded_proto: false,
            }))
    }

    async fn raw_exchange(request: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, gated_app(), async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("server should finish the exchange");

        let _ = stop_tx.send(());
        server.await.unwrap();
        read.map(|_| buf)
    }

    fn test_config(hide_public: bool) -> Config {
        Config {
            env_name: "test".to_string(),
            production: false,
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: "http://localhost:3001".to_string(),
            static_dir: "does-not-exist".to_string(),
            trust_proxy: true,
            hide_public,
            bot_token: Some("123456:AAbbCCddEEffGGhhIIjjKKllMMnnOOppQQ".to_string()),
            init_data_max_age_secs: None,
        }
    }

    fn get_req(uri: &str) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "192.0.2.1")
            .header("sec-fetch-dest", "document")
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_env_when_ungated() {
        let resp = build_app(&test_config(false), BanStore::new())
            .oneshot(get_req("/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["env"], "test");
    }

    #[tokio::test]
    async fn unknown_api_route_is_json_404() {
        let resp = build_app(&test_config(false), BanStore::new())
            .oneshot(get_req("/api/nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        assert_eq!(&body[..], br#"{"detail":"not found"}"#);
    }

    #[tokio::test]
    async fn gate_hides_health_and_shield_bans_probes() {
        let bans = BanStore::new();
        let app = build_app(&test_config(true), bans.clone());

        let resp = app.clone().oneshot(get_req("/health")).await.unwrap();
        assert!(resp.extensions().get::<DropConnection>().is_some());

        let resp = app.oneshot(get_req("/.git/HEAD")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(bans.len(), 1);
    }

    #[tokio::test]
    async fn gated_document_request_gets_no_status_line() {
        let result = raw_exchange(
            b"GET /courses HTTP/1.1\r\nHost: localhost\r\nSec-Fetch-Dest: document\r\n\r\n",
        )
        .await;

        match result {
            Ok(bytes) => assert!(bytes.is_empty(), "unexpected reply: {bytes:?}"),
            // A reset is just as opaque to the client as a clean close.
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn gated_h2_request_closes_the_whole_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, gated_app(), async {
            let _ = stop_rx.await;
        }));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
                .await
                .unwrap();
        let conn_task = tokio::spawn(conn);

        let gated = axum::http::Request::builder()
            .uri("http://localhost/courses")
            .header("sec-fetch-dest", "document")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert!(sender.send_request(gated).await.is_err());

        let closed = tokio::time::timeout(Duration::from_secs(5), conn_task).await;
        assert!(closed.is_ok(), "server should close the h2 connection");

        let follow_up = axum::http::Request::builder()
            .uri("http://localhost/tg")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert!(sender.send_request(follow_up).await.is_err());

        let _ = stop_tx.send(());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn entry_path_is_answered_over_the_socket() {
        let bytes = raw_exchange(b"GET /tg HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200"), "{text}");
        assert!(text.ends_with("mini app"), "{text}");
    }

    #[tokio::test]
    async fn fetch_rejection_is_a_plain_404_over_the_socket() {
        let bytes = raw_exchange(
            b"GET /api/courses HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 404"), "{text}");
    }
}
