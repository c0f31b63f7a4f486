//! Bans clients that probe for well-known exploit paths.
//!
//! Bans live in a [`BanStore`] owned by the caller, so a server can clear it on
//! shutdown and tests can start from an empty store.

use crate::client_ip::client_ip;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

pub const BAN_WINDOW: Duration = Duration::from_secs(10 * 60);

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

const BLOCKED_SUBSTRINGS: [&str; 18] = [
    "/.git",
    "/.env",
    "/.ht",
    "/wp-admin",
    "/wp-login",
    "/phpmyadmin",
    "/cgi-bin",
    "/server-status",
    "/.well-known",
    "/vendor/phpunit",
    "/.svn",
    "/.hg",
    "/.bzr",
    "/composer.",
    "/package.json",
    "/package-lock.json",
    "/yarn.lock",
    "/pnpm-lock.yaml",
];

const BLOCKED_EXTENSIONS: [&str; 17] = [
    ".php", ".asp", ".aspx", ".jsp", ".cgi", ".bak", ".old", ".sql", ".zip", ".tar", ".tar.gz",
    ".tgz", ".rar", ".7z", ".ini", ".conf", ".log",
];

/// Process-local map of banned client addresses to ban expiry.
///
/// Lookups evict the entry they touch. Bans additionally sweep the whole map
/// at most once per window, so addresses that never return cannot pile up.
#[derive(Clone, Debug)]
pub struct BanStore {
    window: Duration,
    inner: Arc<Mutex<BanMap>>,
}

#[derive(Debug, Default)]
struct BanMap {
    entries: HashMap<IpAddr, Instant>,
    next_sweep: Option<Instant>,
}

impl BanMap {
    fn sweep_if_due(&mut self, now: Instant, window: Duration) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.entries.retain(|_, until| *until > now);
        self.next_sweep = Some(now + window);
    }
}

impl Default for BanStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BanStore {
    pub fn new() -> Self {
        Self::with_window(BAN_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::new(Mutex::new(BanMap::default())),
        }
    }

    pub fn ban(&self, ip: IpAddr) {
        self.ban_at(ip, Instant::now());
    }

    pub fn ban_at(&self, ip: IpAddr, now: Instant) {
        let mut map = self.lock();
        map.sweep_if_due(now, self.window);
        map.entries.insert(ip, now + self.window);
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.is_banned_at(ip, Instant::now())
    }

    pub fn is_banned_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut map = self.lock();
        let Some(until) = map.entries.get(&ip).copied() else {
            return false;
        };
        if until <= now {
            map.entries.remove(&ip);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut map = self.lock();
        map.entries.clear();
        map.next_sweep = None;
    }

    fn lock(&self) -> MutexGuard<'_, BanMap> {
        // The map holds plain data, so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn is_robots_path(path: &str) -> bool {
    path.eq_ignore_ascii_case("/robots.txt")
}

/// Substring signatures are checked before extensions.
pub fn is_probe_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if lower == "/robots.txt" {
        return false;
    }
    if BLOCKED_SUBSTRINGS.iter().any(|part| lower.contains(part)) {
        return true;
    }
    BLOCKED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[derive(Clone, Debug)]
pub struct BotShieldLayer {
    store: BanStore,
    trust_proxy: bool,
}

impl BotShieldLayer {
    pub fn new(store: BanStore, trust_proxy: bool) -> Self {
        Self { store, trust_proxy }
    }
}

impl<S> Layer<S> for BotShieldLayer {
    type Service = BotShieldService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BotShieldService {
            inner,
            store: self.store.clone(),
            trust_proxy: self.trust_proxy,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BotShieldService<S> {
    inner: S,
    store: BanStore,
    trust_proxy: bool,
}

impl<S, B> Service<Request<B>> for BotShieldService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let ip = client_ip(&req, self.trust_proxy);
        let path = req.uri().path().to_string();

        if ip.is_some_and(|ip| self.store.is_banned(ip)) {
            return Box::pin(async { Ok::<_, S::Error>(not_found()) });
        }

        if is_robots_path(&path) {
            return Box::pin(async { Ok::<_, S::Error>(robots_response()) });
        }

        if is_probe_path(&path) {
            if let Some(ip) = ip {
                self.store.ban(ip);
            }
            let ip_label = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
            tracing::info!(
                ip = %ip_label,
                method = %req.method(),
                path = %path,
                "bot probe blocked"
            );
            return Box::pin(async { Ok::<_, S::Error>(not_found()) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn robots_response() -> Response {
    let mut resp = Response::new(Body::from(ROBOTS_TXT));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
