use axum::http::{header, HeaderMap, HeaderValue};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

// Same unreserved set as JavaScript's encodeURIComponent.
const COOKIE_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Looks up `name` in a raw `Cookie` header.
///
/// The first pair with a matching name wins. A bare name or `name=` yields
/// `Some("")`; a value that is not valid percent-encoded UTF-8 yields `None`.
pub fn read_cookie(raw: &str, name: &str) -> Option<String> {
    find_cookie(raw, name).flatten()
}

/// Searches every `Cookie` header on the request, in order. The first pair
/// named `name` decides the result, even if it fails to decode.
pub fn read_request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| find_cookie(raw, name))
        .flatten()
}

/// Outer `None` means no pair is named `name`.
fn find_cookie(raw: &str, name: &str) -> Option<Option<String>> {
    for part in raw.split(';') {
        let part = part.trim();
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        if key.is_empty() || key != name {
            continue;
        }
        if value.is_empty() {
            return Some(Some(String::new()));
        }
        return Some(decode_component(value));
    }
    None
}

pub fn session_cookie_value(name: &str, value: &str, ttl_secs: u64, secure: bool) -> String {
    let mut out = format!(
        "{name}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_secs}",
        utf8_percent_encode(value, COOKIE_VALUE)
    );
    if secure {
        out.push_str("; Secure");
    }
    out
}

/// Queues a cookie without disturbing any `Set-Cookie` already present.
pub fn write_cookie(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
    ttl_secs: u64,
    secure: bool,
) {
    append_set_cookie(headers, &session_cookie_value(name, value, ttl_secs, secure));
}

pub fn append_set_cookie(headers: &mut HeaderMap, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.append(header::SET_COOKIE, v);
    }
}

fn decode_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let well_formed = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !well_formed {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_named_cookie_among_others() {
        let raw = "theme=dark; cg_hp=v1.1.abc.def; lang=en";
        assert_eq!(read_cookie(raw, "cg_hp").as_deref(), Some("v1.1.abc.def"));
        assert_eq!(read_cookie(raw, "lang").as_deref(), Some("en"));
        assert_eq!(read_cookie(raw, "missing"), None);
    }

    #[test]
    fn empty_value_is_distinct_from_absent() {
        assert_eq!(read_cookie("cg_hp=; a=b", "cg_hp").as_deref(), Some(""));
        assert_eq!(read_cookie("a=b; cg_hp", "cg_hp").as_deref(), Some(""));
        assert_eq!(read_cookie("a=b", "cg_hp"), None);
    }

    #[test]
    fn value_keeps_embedded_equals_signs() {
        assert_eq!(read_cookie("k=a=b=c", "k").as_deref(), Some("a=b=c"));
    }

    #[test]
    fn first_duplicate_wins() {
        assert_eq!(read_cookie("k=one; k=two", "k").as_deref(), Some("one"));
    }

    #[test]
    fn name_match_is_exact() {
        assert_eq!(read_cookie("cg_hp_old=x; xcg_hp=y", "cg_hp"), None);
        assert_eq!(read_cookie("=orphan; cg_hp=z", "cg_hp").as_deref(), Some("z"));
    }

    #[test]
    fn percent_decodes_value() {
        assert_eq!(read_cookie("k=a%20b%2Fc", "k").as_deref(), Some("a b/c"));
        assert_eq!(read_cookie("k=a+b", "k").as_deref(), Some("a+b"));
    }

    #[test]
    fn malformed_encoding_is_treated_as_absent() {
        assert_eq!(read_cookie("k=%zz", "k"), None);
        assert_eq!(read_cookie("k=abc%", "k"), None);
        assert_eq!(read_cookie("k=%ff%fe", "k"), None);
    }

    #[test]
    fn reads_across_split_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("cg_hp=tok"));
        assert_eq!(read_request_cookie(&headers, "cg_hp").as_deref(), Some("tok"));
    }

    #[test]
    fn undecodable_first_match_hides_later_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; cg_hp=%zz"));
        headers.append(header::COOKIE, HeaderValue::from_static("cg_hp=tok"));
        assert_eq!(read_request_cookie(&headers, "cg_hp"), None);
    }

    #[test]
    fn cookie_attributes_without_secure() {
        let value = session_cookie_value("cg_hp", "v1.1.n.s", 900, false);
        assert_eq!(
            value,
            "cg_hp=v1.1.n.s; Path=/; HttpOnly; SameSite=Lax; Max-Age=900"
        );
    }

    #[test]
    fn cookie_attributes_with_secure() {
        let value = session_cookie_value("cg_hp", "a b", 60, true);
        assert_eq!(
            value,
            "cg_hp=a%20b; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure"
        );
    }

    #[test]
    fn write_preserves_previously_queued_cookies() {
        let mut headers = HeaderMap::new();
        append_set_cookie(&mut headers, "first=1; Path=/");
        append_set_cookie(&mut headers, "second=2; Path=/");
        write_cookie(&mut headers, "cg_hp", "tok", 60, false);

        let all: Vec<&str> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], "first=1; Path=/");
        assert_eq!(all[1], "second=2; Path=/");
        assert!(all[2].starts_with("cg_hp=tok;"));
    }
}
