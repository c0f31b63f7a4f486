use axum::http::{header, HeaderMap, Uri};
use url::form_urlencoded;

pub const API_PREFIX: &str = "/api";

pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

pub const INIT_DATA_QUERY_KEYS: [&str; 3] = ["tgWebAppData", "initData", "initdata"];

/// Webhooks called by services that can never hold a browser cookie.
pub const ALLOWED_PATH_PREFIXES: [&str; 6] = [
    "/api/webhooks/telegram",
    "/api/webhooks/paypal",
    "/api/paypal-hook",
    "/webhooks/telegram",
    "/webhooks/paypal",
    "/paypal-hook",
];

pub const MINI_APP_ENTRY_PATHS: [&str; 3] = ["/tg", "/tg/", "/tg.html"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitDataSource {
    Header,
    Query,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedInitData {
    pub value: String,
    pub source: InitDataSource,
}

pub fn is_api_request(path: &str) -> bool {
    path.starts_with(API_PREFIX)
}

pub fn is_allowed_path(path: &str) -> bool {
    !path.is_empty() && ALLOWED_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub fn is_mini_app_entry_path(path: &str) -> bool {
    MINI_APP_ENTRY_PATHS.contains(&path)
}

/// Browser navigation (safe to redirect or drop) as opposed to XHR/fetch.
pub fn is_document_request(headers: &HeaderMap) -> bool {
    let dest = header_str(headers, "sec-fetch-dest");
    if dest.is_some_and(|d| d.eq_ignore_ascii_case("document")) {
        return true;
    }
    header_str(headers, header::ACCEPT.as_str()).is_some_and(|a| a.contains("text/html"))
}

/// Only the first hop of `X-Forwarded-Proto` counts, and only when trusted.
pub fn is_secure_request(uri: &Uri, headers: &HeaderMap, trust_forwarded_proto: bool) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }
    if !trust_forwarded_proto {
        return false;
    }
    header_str(headers, "x-forwarded-proto")
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim() == "https")
}

/// Header first, then the known query spellings in order.
pub fn extract_init_data(headers: &HeaderMap, uri: &Uri) -> Option<ExtractedInitData> {
    if let Some(value) = header_str(headers, INIT_DATA_HEADER) {
        if !value.trim().is_empty() {
            return Some(ExtractedInitData {
                value: value.to_string(),
                source: InitDataSource::Header,
            });
        }
    }

    let query = uri.query()?;
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    INIT_DATA_QUERY_KEYS.iter().find_map(|key| {
        pairs
            .iter()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| ExtractedInitData {
                value: v.clone(),
                source: InitDataSource::Query,
            })
    })
}

/// Path plus query with every identity key removed. Remaining query
/// segments are kept byte-for-byte in their original order.
pub fn build_clean_url(uri: &Uri) -> String {
    let path = match uri.path() {
        "" => "/",
        p => p,
    };
    let Some(query) = uri.query() else {
        return path.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|segment| !is_identity_segment(segment))
        .collect();
    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

pub fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

fn is_identity_segment(segment: &str) -> bool {
    let raw_key = segment.split_once('=').map_or(segment, |(k, _)| k);
    form_urlencoded::parse(raw_key.as_bytes())
        .next()
        .is_some_and(|(key, _)| INIT_DATA_QUERY_KEYS.contains(&key.as_ref()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
