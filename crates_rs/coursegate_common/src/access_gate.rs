//! Hides the whole application behind Telegram identity proof.
//!
//! A request gets through when it targets a Mini-App entry route or an
//! allow-listed webhook, when it carries a valid gate cookie, or when it
//! presents valid `initData` (which also mints the cookie). Every failure,
//! including misconfiguration, is treated as unauthenticated.

use crate::cookie_jar::{append_set_cookie, read_request_cookie, session_cookie_value};
use crate::init_data::InitDataValidator;
use crate::request_class::{
    build_clean_url, extract_init_data, is_allowed_path, is_api_request, is_document_request,
    is_mini_app_entry_path, is_secure_request, path_and_query, InitDataSource,
};
use crate::token::TokenCodec;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub const COOKIE_NAME: &str = "cg_hp";
pub const TOKEN_MIN_TTL_SECS: u64 = 60;
pub const DEFAULT_INIT_DATA_MAX_AGE_SECS: u64 = 15 * 60;

/// Response extension asking the connection owner to close the socket
/// instead of writing the attached 404.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropConnection;

#[derive(Clone, Debug, Default)]
pub struct AccessGateConfig {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub init_data_max_age_secs: Option<u64>,
    /// Production always marks the cookie `Secure`.
    pub production: bool,
    pub trust_forwarded_proto: bool,
}

impl AccessGateConfig {
    pub fn token_ttl_secs(&self) -> u64 {
        self.init_data_max_age_secs
            .unwrap_or(DEFAULT_INIT_DATA_MAX_AGE_SECS)
            .max(TOKEN_MIN_TTL_SECS)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    /// Continue and attach the given `Set-Cookie` value.
    PassWithCookie(String),
    Redirect { location: String, cookie: String },
    Drop,
    NotFound,
}

#[derive(Debug)]
struct GateRuntime {
    enabled: bool,
    ttl_secs: u64,
    production: bool,
    trust_forwarded_proto: bool,
    codec: TokenCodec,
    validator: InitDataValidator,
}

#[derive(Clone, Debug)]
pub struct AccessGateLayer {
    runtime: Arc<GateRuntime>,
}

impl AccessGateLayer {
    pub fn new(config: AccessGateConfig) -> Self {
        let ttl_secs = config.token_ttl_secs();
        Self {
            runtime: Arc::new(GateRuntime {
                enabled: config.enabled,
                ttl_secs,
                production: config.production,
                trust_forwarded_proto: config.trust_forwarded_proto,
                codec: TokenCodec::new(config.bot_token.as_deref()),
                validator: InitDataValidator::new(config.bot_token),
            }),
        }
    }

    pub fn decide<B>(&self, req: &Request<B>) -> GateDecision {
        self.runtime.decide(req)
    }
}

impl GateRuntime {
    fn has_valid_cookie<B>(&self, req: &Request<B>) -> bool {
        read_request_cookie(req.headers(), COOKIE_NAME)
            .filter(|token| !token.is_empty())
            .is_some_and(|token| self.codec.verify(&token, self.ttl_secs))
    }

    fn rejection<B>(&self, req: &Request<B>) -> GateDecision {
        if is_document_request(req.headers()) {
            GateDecision::Drop
        } else {
            GateDecision::NotFound
        }
    }

    fn decide<B>(&self, req: &Request<B>) -> GateDecision {
        if !self.enabled {
            return GateDecision::Pass;
        }

        let path = req.uri().path();
        if !is_api_request(path) {
            if is_mini_app_entry_path(path) || self.has_valid_cookie(req) {
                return GateDecision::Pass;
            }
            return GateDecision::Drop;
        }

        if is_allowed_path(path) || self.has_valid_cookie(req) {
            return GateDecision::Pass;
        }

        let Some(init_data) = extract_init_data(req.headers(), req.uri()) else {
            return self.rejection(req);
        };
        if !self.validator.validate(&init_data.value, self.ttl_secs) {
            return self.rejection(req);
        }
        let Some(token) = self.codec.mint() else {
            tracing::error!("hidePublic could not mint an access token");
            return self.rejection(req);
        };

        let secure = self.production
            || is_secure_request(req.uri(), req.headers(), self.trust_forwarded_proto);
        let cookie = session_cookie_value(COOKIE_NAME, &token, self.ttl_secs, secure);

        let navigates = matches!(*req.method(), Method::GET | Method::HEAD)
            && is_document_request(req.headers());
        if init_data.source == InitDataSource::Query && navigates {
            let location = build_clean_url(req.uri());
            if location != path_and_query(req.uri()) {
                return GateDecision::Redirect { location, cookie };
            }
        }
        GateDecision::PassWithCookie(cookie)
    }
}

impl<S> Layer<S> for AccessGateLayer {
    type Service = AccessGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessGateService {
            inner,
            runtime: self.runtime.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccessGateService<S> {
    inner: S,
    runtime: Arc<GateRuntime>,
}

impl<S, B> Service<Request<B>> for AccessGateService<S>
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
        let decision = self.runtime.decide(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decision {
                GateDecision::Pass => inner.call(req).await,
                GateDecision::PassWithCookie(cookie) => {
                    let mut resp = inner.call(req).await?;
                    append_set_cookie(resp.headers_mut(), &cookie);
                    Ok(resp)
                }
                GateDecision::Redirect { location, cookie } => {
                    let Ok(location) = HeaderValue::from_str(&location) else {
                        let mut resp = inner.call(req).await?;
                        append_set_cookie(resp.headers_mut(), &cookie);
                        return Ok(resp);
                    };
                    let mut resp = StatusCode::FOUND.into_response();
                    resp.headers_mut().insert(header::LOCATION, location);
                    append_set_cookie(resp.headers_mut(), &cookie);
                    Ok(resp)
                }
                GateDecision::Drop => {
                    tracing::debug!(path = %req.uri().path(), "hidePublic dropping connection");
                    Ok(drop_response())
                }
                GateDecision::NotFound => {
                    tracing::debug!(path = %req.uri().path(), "hidePublic rejected request");
                    Ok(StatusCode::NOT_FOUND.into_response())
                }
            }
        })
    }
}

/// Bodiless 404 tagged with [`DropConnection`]; the 404 is what a client sees
/// when the server cannot reach the socket.
pub fn drop_response() -> Response {
    let mut resp = StatusCode::NOT_FOUND.into_response();
    resp.extensions_mut().insert(DropConnection);
    resp
}
