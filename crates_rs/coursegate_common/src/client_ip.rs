use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};

/// Leftmost `X-Forwarded-For` hop when the proxy is trusted, else the peer.
pub fn client_ip<B>(req: &Request<B>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(parse_ip);
        if forwarded.is_some() {
            return forwarded;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }
    let token = token
        .strip_prefix("for=")
        .or_else(|| token.strip_prefix("For="))
        .unwrap_or(token)
        .trim()
        .trim_matches('"');

    if let Ok(ip) = token.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = token.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    token
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn parse_ip_accepts_ip_and_socket_formats() {
        assert_eq!(parse_ip("1.2.3.4"), "1.2.3.4".parse().ok());
        assert_eq!(parse_ip(" 1.2.3.4:8080 "), "1.2.3.4".parse().ok());
        assert_eq!(parse_ip("[2001:db8::1]"), "2001:db8::1".parse().ok());
        assert_eq!(
            parse_ip("for=\"[2001:db8::2]:443\""),
            "2001:db8::2".parse().ok()
        );
        assert_eq!(parse_ip("not-an-ip"), None);
        assert_eq!(parse_ip(""), None);
    }

    #[test]
    fn forwarded_header_only_when_trusted() {
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(client_ip(&req, true), "203.0.113.9".parse().ok());
        assert_eq!(client_ip(&req, false), Some(peer.ip()));
    }

    #[test]
    fn unresolvable_client_is_none() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, true), None);
    }
}
