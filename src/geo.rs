use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Approximate geolocation for one IP address.
#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub country: String,
    pub region: String,
    pub city: String,
}

/// ip-api.com response shape.
#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
}

/// IP geolocation lookups with an in-memory result cache so the same IP
/// is never looked up more than once per process lifetime. A cached
/// `None` means the lookup already failed or returned nothing; it is not
/// retried.
///
/// Only the click-recorder worker calls this — never the redirect path.
pub struct GeoService {
    client: reqwest::Client,
    cache: DashMap<String, Option<GeoInfo>>,
}

impl GeoService {
    pub fn new() -> anyhow::Result<Self> {
        // Strict timeout so a slow upstream can never stall the recorder
        // worker for long.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()?;

        Ok(Self {
            client,
            cache: DashMap::new(),
        })
    }

    /// Look up geolocation for `ip`. Returns `None` for private/loopback
    /// addresses, failed or rate-limited responses, and known misses.
    pub async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        if is_private(ip) {
            return None;
        }

        if let Some(entry) = self.cache.get(ip) {
            return entry.clone();
        }

        let result = self.fetch(ip).await;

        // Cache misses too so we don't retry endlessly.
        self.cache.insert(ip.to_owned(), result.clone());

        result
    }

    async fn fetch(&self, ip: &str) -> Option<GeoInfo> {
        let url = format!(
            "http://ip-api.com/json/{}?fields=status,country,regionName,city",
            ip
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| tracing::debug!("geo lookup network error for {}: {}", ip, e))
            .ok()?;

        let body: IpApiResponse = resp
            .json()
            .await
            .map_err(|e| tracing::debug!("geo lookup parse error for {}: {}", ip, e))
            .ok()?;

        if body.status != "success" {
            tracing::debug!("geo lookup returned non-success status for {}", ip);
            return None;
        }

        let country = body.country.filter(|s| !s.is_empty()).unwrap_or_default();
        let region = body
            .region_name
            .filter(|s| !s.is_empty())
            .unwrap_or_default();
        let city = body.city.filter(|s| !s.is_empty()).unwrap_or_default();

        if country.is_empty() && region.is_empty() && city.is_empty() {
            return None;
        }

        Some(GeoInfo {
            country,
            region,
            city,
        })
    }
}

/// Return `true` for addresses that should never be sent to a public
/// geolocation API: loopback, link-local, private ranges, and IPv6
/// special addresses.
fn is_private(ip_str: &str) -> bool {
    // Strip IPv6-mapped IPv4 prefix: "::ffff:1.2.3.4" → "1.2.3.4"
    let ip_str = ip_str.strip_prefix("::ffff:").unwrap_or(ip_str);

    match IpAddr::from_str(ip_str) {
        Ok(IpAddr::V4(addr)) => {
            let octets = addr.octets();
            addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
                || octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        }
        Ok(IpAddr::V6(addr)) => {
            addr.is_loopback()
                || addr.is_unspecified()
                || (addr.segments()[0] & 0xffc0) == 0xfe80
                || (addr.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => true, // unparseable → skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_skipped() {
        assert!(is_private("127.0.0.1"));
        assert!(is_private("10.1.2.3"));
        assert!(is_private("172.20.0.1"));
        assert!(is_private("192.168.1.1"));
        assert!(is_private("::1"));
        assert!(is_private("::ffff:192.168.0.5"));
        assert!(is_private("not-an-ip"));
        assert!(!is_private("93.184.216.34"));
    }
}
