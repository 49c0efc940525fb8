use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use woothee::parser::Parser;

use crate::cache::CachedLink;
use crate::models::{ClickEvent, DeviceClass};
use crate::recorder::ClickJob;
use crate::AppState;

/// GET /:code
///
/// 1. Check the in-memory cache for the short code (fast path — no store
///    hit).
/// 2. On a cache miss, fall back to the store under a bounded timeout; a
///    slow store resolves to 503, never a hung request.
/// 3. Hand the click to the recorder queue without awaiting it, so the
///    redirect latency is bounded by the lookup alone.
/// 4. Return a 302 redirect to the target URL.
///
/// Soft-deleted links still redirect; only hard-deleted codes 404.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    // ── 1. Resolve the code ────────────────────────────────────────────────
    let cached = match state.cache.get(&code) {
        Some(entry) => entry,
        None => {
            let lookup = tokio::time::timeout(
                Duration::from_millis(state.config.store_timeout_ms),
                state.store.get(&code),
            )
            .await;

            match lookup {
                Ok(Ok(Some(link))) => {
                    // Backfill the cache for next time
                    state.cache.set(&link);
                    CachedLink::from(&link)
                }
                Ok(Ok(None)) => {
                    return (StatusCode::NOT_FOUND, "Short link not found").into_response();
                }
                Ok(Err(e)) => {
                    tracing::error!("store error looking up short code '{}': {e:#}", code);
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Temporarily unavailable, try again",
                    )
                        .into_response();
                }
                Err(_) => {
                    tracing::error!("store lookup timed out for short code '{}'", code);
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Temporarily unavailable, try again",
                    )
                        .into_response();
                }
            }
        }
    };

    // ── 2. Extract request metadata ────────────────────────────────────────
    let ip = extract_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let referrer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let device = classify_device(
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok()),
    );

    // ── 3. Hand the click to the recorder (never blocks the redirect) ──────
    state.recorder.enqueue(ClickJob {
        event: ClickEvent::new(&code, referrer, device),
        owner_id: cached.owner_id,
        ip,
    });

    // ── 4. Redirect ────────────────────────────────────────────────────────
    (
        StatusCode::FOUND,
        [(header::LOCATION, cached.target_url)],
    )
        .into_response()
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Determine the real client IP, preferring common proxy headers.
fn extract_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> Option<String> {
    // X-Forwarded-For can be a comma-separated list; take the first entry.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return Some(ip.to_owned());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return Some(real_ip.to_owned());
        }
    }

    addr.map(|a| a.ip().to_string())
}

/// Collapse woothee's User-Agent categories into the coarse device
/// classes the analytics buckets use.
fn classify_device(ua: Option<&str>) -> DeviceClass {
    let ua = match ua {
        Some(s) if !s.is_empty() => s,
        _ => return DeviceClass::Unknown,
    };

    match Parser::new().parse(ua) {
        Some(result) => match result.category {
            "pc" => DeviceClass::Desktop,
            "smartphone" | "mobilephone" => DeviceClass::Mobile,
            "crawler" => DeviceClass::Bot,
            _ => DeviceClass::Unknown,
        },
        None => DeviceClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_user_agents() {
        let chrome = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                      (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                      AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
        let bot = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

        assert_eq!(classify_device(Some(chrome)), DeviceClass::Desktop);
        assert_eq!(classify_device(Some(iphone)), DeviceClass::Mobile);
        assert_eq!(classify_device(Some(bot)), DeviceClass::Bot);
        assert_eq!(classify_device(None), DeviceClass::Unknown);
        assert_eq!(classify_device(Some("")), DeviceClass::Unknown);
    }

    #[test]
    fn prefers_forwarded_headers_for_client_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(
            extract_ip(&headers, Some(addr)),
            Some("203.0.113.9".to_owned())
        );

        let empty = HeaderMap::new();
        assert_eq!(extract_ip(&empty, Some(addr)), Some("127.0.0.1".to_owned()));
        assert_eq!(extract_ip(&empty, None), None);
    }
}
