use crate::config::Config;
use crate::safe_url::UrlGuard;
use anyhow::{anyhow, Result};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use url::Url;

/// Age below which a registration is considered "very new". Freshly
/// registered domains are heavily over-represented in phishing campaigns.
const VERY_NEW_THRESHOLD_DAYS: f64 = 30.0;

/// Registration dates recovered from a WHOIS response.
#[derive(Debug, Clone)]
pub struct WhoisInfo {
    pub age_days: Option<f64>,
    pub registration_years: Option<f64>,
    cached_at: SystemTime,
}

/// WHOIS lookup strategy, selected once at startup. `Disabled` is the
/// always-unknown backend used when the operator opts out of network
/// lookups; every feature it feeds stays `None`.
pub enum WhoisBackend {
    Network(WhoisClient),
    Disabled,
}

impl WhoisBackend {
    async fn lookup(&self, domain: &str) -> Option<WhoisInfo> {
        match self {
            WhoisBackend::Network(client) => client.domain_info(domain).await,
            WhoisBackend::Disabled => None,
        }
    }
}

/// Direct WHOIS client: picks a registry server by TLD, queries TCP port 43,
/// and parses creation/expiry dates out of the text response. Results are
/// cached in-memory with a TTL so batch scans do not hammer the registries.
pub struct WhoisClient {
    cache: Arc<RwLock<HashMap<String, WhoisInfo>>>,
    cache_ttl: Duration,
    timeout: Duration,
}

impl WhoisClient {
    pub fn new(timeout_seconds: u64, cache_ttl_hours: u64) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl: Duration::from_secs(cache_ttl_hours * 60 * 60),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Fetch registration info for a domain, with caching. Any failure
    /// (connect, timeout, unparsable response) yields `None`.
    pub async fn domain_info(&self, domain: &str) -> Option<WhoisInfo> {
        let domain = extract_root_domain(&domain.to_lowercase());

        // Reject junk before it reaches a registry
        if domain.is_empty() || !domain.contains('.') || domain.contains(char::is_whitespace) {
            log::debug!("invalid domain for WHOIS: {domain}");
            return None;
        }

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&domain) {
                let age = SystemTime::now()
                    .duration_since(cached.cached_at)
                    .unwrap_or(Duration::from_secs(0));
                if age < self.cache_ttl {
                    log::debug!("using cached WHOIS info for {domain}");
                    return Some(cached.clone());
                }
            }
        }

        let info = match self.fetch_info(&domain).await {
            Ok(info) => info,
            Err(e) => {
                log::debug!("WHOIS lookup failed for {domain}: {e}");
                return None;
            }
        };

        {
            let mut cache = self.cache.write().await;
            cache.insert(domain, info.clone());
        }
        Some(info)
    }

    async fn fetch_info(&self, domain: &str) -> Result<WhoisInfo> {
        let server = whois_server_for(domain);
        log::debug!("querying WHOIS server {server} for {domain}");

        match self.query_server(server, domain).await {
            Ok(text) => parse_whois_text(&text),
            Err(e) => {
                log::debug!("WHOIS query to {server} failed: {e}");
                for fallback in ["whois.iana.org", "whois.internic.net"] {
                    if fallback == server {
                        continue;
                    }
                    if let Ok(text) = self.query_server(fallback, domain).await {
                        if let Ok(info) = parse_whois_text(&text) {
                            return Ok(info);
                        }
                    }
                }
                Err(anyhow!("all WHOIS servers failed for {domain}"))
            }
        }
    }

    /// Query a WHOIS server directly on TCP port 43.
    async fn query_server(&self, server: &str, domain: &str) -> Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;
        use tokio::time::timeout;

        let mut stream =
            timeout(self.timeout, TcpStream::connect(format!("{server}:43"))).await??;

        let query = format!("{domain}\r\n");
        stream.write_all(query.as_bytes()).await?;

        let mut response = String::new();
        timeout(self.timeout, stream.read_to_string(&mut response)).await??;

        if response.is_empty() {
            return Err(anyhow!("empty WHOIS response"));
        }
        Ok(response)
    }
}

/// Domain trust extraction: WHOIS-derived registration features, DNS
/// existence, and a deterministic abnormal-hostname heuristic. Lookup-backed
/// features are `None` ("unknown") whenever the service is skipped,
/// unavailable, or fails; `None` is distinct from a measured 0.
pub struct DomainTrustAnalyzer {
    whois: WhoisBackend,
    resolver: Option<TokioAsyncResolver>,
    dns_timeout: Duration,
    guard: Arc<UrlGuard>,
}

impl DomainTrustAnalyzer {
    pub fn new(config: &Config, guard: Arc<UrlGuard>) -> Self {
        let whois = if config.whois.enabled {
            WhoisBackend::Network(WhoisClient::new(
                config.whois.timeout_seconds,
                config.whois.cache_ttl_hours,
            ))
        } else {
            log::info!("WHOIS lookups disabled; registration features will be unknown");
            WhoisBackend::Disabled
        };

        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => Some(r),
            Err(e) => {
                log::warn!("system DNS resolver unavailable: {e}");
                None
            }
        };

        Self {
            whois,
            resolver,
            dns_timeout: Duration::from_secs(config.dns.timeout_seconds),
            guard,
        }
    }

    /// Extract the domain feature pairs in canonical emission order. With
    /// `skip_external_lookups` every lookup-backed value is `None`.
    pub async fn extract(
        &self,
        url: &str,
        skip_external_lookups: bool,
    ) -> Vec<(&'static str, Option<f64>)> {
        if skip_external_lookups {
            return self.extract_offline(url);
        }

        let host = match hostname_of(url) {
            Some(h) => h,
            None => return self.extract_offline(url),
        };

        // The guard is the single authority over outbound lookups; a target
        // it rejects gets no WHOIS or DNS traffic, only the offline signals.
        if let Err(e) = self.guard.check(url) {
            log::debug!("domain lookups blocked for {url}: {e}");
            return self.extract_offline(url);
        }

        // Registries answer for names, not addresses; IP-literal hosts keep
        // their registration features unknown.
        let whois = if host.parse::<std::net::IpAddr>().is_ok() {
            None
        } else {
            self.whois.lookup(&host).await
        };
        let (age_days, registration_years) = match &whois {
            Some(info) => (info.age_days, info.registration_years),
            None => (None, None),
        };
        let dns_exists = self.dns_record_exists(&host).await;

        assemble_pairs(Some(&host), age_days, registration_years, dns_exists)
    }

    /// Offline variant: no I/O at all. Used for skipped lookups, for
    /// unparsable URLs, and to derive the canonical key order.
    pub fn extract_offline(&self, url: &str) -> Vec<(&'static str, Option<f64>)> {
        let host = hostname_of(url);
        assemble_pairs(host.as_deref(), None, None, None)
    }

    /// DNS existence: `Some(1)` when an A record (falling back to AAAA)
    /// resolves, `Some(0)` when resolution explicitly reports no records,
    /// `None` when no resolver is available or the lookup cannot complete.
    async fn dns_record_exists(&self, host: &str) -> Option<f64> {
        use tokio::time::timeout;

        let resolver = self.resolver.as_ref()?;

        let v4 = timeout(self.dns_timeout, resolver.ipv4_lookup(host)).await;
        match v4 {
            Ok(Ok(_)) => return Some(1.0),
            Ok(Err(e)) if !matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                log::debug!("A lookup for {host} errored: {e}");
                return None;
            }
            Err(_) => {
                log::debug!("A lookup for {host} timed out");
                return None;
            }
            _ => {}
        }

        let v6 = timeout(self.dns_timeout, resolver.ipv6_lookup(host)).await;
        match v6 {
            Ok(Ok(_)) => Some(1.0),
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Some(0.0),
                _ => {
                    log::debug!("AAAA lookup for {host} errored: {e}");
                    None
                }
            },
            Err(_) => {
                log::debug!("AAAA lookup for {host} timed out");
                None
            }
        }
    }
}

fn assemble_pairs(
    host: Option<&str>,
    age_days: Option<f64>,
    registration_years: Option<f64>,
    dns_exists: Option<f64>,
) -> Vec<(&'static str, Option<f64>)> {
    vec![
        ("domain_age_days", age_days),
        ("registration_length_years", registration_years),
        ("dns_record_exists", dns_exists),
        (
            "abnormal_domain_pattern",
            Some(abnormal_domain_pattern(host.unwrap_or("")) as f64),
        ),
        ("domain_very_new", derive_very_new(age_days)),
    ]
}

/// Hostname via the same scheme-default/parse step as the lexical extractor.
fn hostname_of(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let normalized = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    let parsed = Url::parse(&normalized).ok()?;
    parsed.host_str().map(|h| {
        h.trim_start_matches('[')
            .trim_end_matches(']')
            .to_lowercase()
    })
}

/// Deterministic 0/1 heuristic over the hostname alone. Any one of: very
/// long hostname, more than two dots, more than three digits, two or more
/// hyphens. Legitimate CDN hostnames occasionally trip this; it is one
/// weak signal among many, not a verdict.
pub fn abnormal_domain_pattern(host: &str) -> u8 {
    if host.is_empty() {
        return 0;
    }
    let long = host.len() > 40;
    let dotted = host.matches('.').count() > 2;
    let digits = host.chars().filter(|c| c.is_ascii_digit()).count() > 3;
    let hyphens = host.matches('-').count() >= 2;
    u8::from(long || dotted || digits || hyphens)
}

/// Three-valued freshness flag: 1 when age < 30 days, 0 when age is known
/// and at least 30, `None` when age itself is unknown. Collapsing the
/// unknown case to 0 would erase the signal, so it is preserved here and
/// imputed only at the assembler boundary.
pub fn derive_very_new(age_days: Option<f64>) -> Option<f64> {
    age_days.map(|age| if age < VERY_NEW_THRESHOLD_DAYS { 1.0 } else { 0.0 })
}

/// Registry WHOIS servers by TLD; IANA catches the rest.
fn whois_server_for(domain: &str) -> &'static str {
    let tld = domain.rsplit('.').next().unwrap_or(domain);
    match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.afilias.net",
        "biz" => "whois.neulevel.biz",
        "us" => "whois.nic.us",
        "uk" => "whois.nic.uk",
        "de" => "whois.denic.de",
        "fr" => "whois.afnic.fr",
        "it" => "whois.nic.it",
        "nl" => "whois.domain-registry.nl",
        "au" => "whois.auda.org.au",
        "ca" => "whois.cira.ca",
        "jp" => "whois.jprs.jp",
        "cn" => "whois.cnnic.cn",
        "ru" => "whois.tcinet.ru",
        "br" => "whois.registro.br",
        "mx" => "whois.mx",
        "tk" => "whois.dot.tk",
        "ml" => "whois.dot.ml",
        "ga" => "whois.dot.ga",
        "cf" => "whois.dot.cf",
        _ => "whois.iana.org",
    }
}

/// Strip subdomains for the registry query, keeping common two-part TLDs
/// intact ("mail.example.co.uk" -> "example.co.uk").
pub fn extract_root_domain(domain: &str) -> String {
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 {
        return domain.to_string();
    }

    let last_two = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    if parts.len() >= 3 {
        let two_part_tlds = [
            "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in", "com.sg",
            "co.nz", "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk", "edu.au",
        ];
        if two_part_tlds.contains(&last_two.as_str()) {
            return format!("{}.{}", parts[parts.len() - 3], last_two);
        }
    }
    last_two
}

/// Parse creation and expiry dates out of a WHOIS text response. Dates come
/// in many registry-specific shapes; matching stops at the first pattern
/// that yields a parsable date.
pub fn parse_whois_text(text: &str) -> Result<WhoisInfo> {
    let creation_patterns = [
        r"(?i)creation\s*date[:\s]+([^\r\n]+)",
        r"(?i)created(?:\s*on)?[:\s]+([^\r\n]+)",
        r"(?i)registered(?:\s*on)?[:\s]+([^\r\n]+)",
        r"(?i)domain\s*created[:\s]+([^\r\n]+)",
        r"(?i)registration\s*date[:\s]+([^\r\n]+)",
        r"(?i)create_date[:\s]+([^\r\n]+)",
        r"(?i)created_date[:\s]+([^\r\n]+)",
        r"(?i)registration_time[:\s]+([^\r\n]+)",
    ];
    let expiry_patterns = [
        r"(?i)registry\s*expiry\s*date[:\s]+([^\r\n]+)",
        r"(?i)expiration\s*date[:\s]+([^\r\n]+)",
        r"(?i)expiry\s*date[:\s]+([^\r\n]+)",
        r"(?i)expires(?:\s*on)?[:\s]+([^\r\n]+)",
        r"(?i)paid-till[:\s]+([^\r\n]+)",
    ];

    let creation = first_date_match(text, &creation_patterns);
    let expiry = first_date_match(text, &expiry_patterns);

    let creation = creation.ok_or_else(|| anyhow!("no creation date in WHOIS response"))?;

    let now_days = days_now();
    let age_days = (now_days - creation).max(0.0);
    let registration_years = expiry.map(|exp| ((exp - creation) / 365.25).max(0.0));

    log::debug!("WHOIS parsed: age {age_days:.0} days, registration {registration_years:?} years");

    Ok(WhoisInfo {
        age_days: Some(age_days),
        registration_years,
        cached_at: SystemTime::now(),
    })
}

fn first_date_match(text: &str, patterns: &[&str]) -> Option<f64> {
    for pattern in patterns {
        let regex = Regex::new(pattern).ok()?;
        if let Some(captures) = regex.captures(text) {
            if let Some(m) = captures.get(1) {
                if let Some(days) = parse_date_days(m.as_str().trim()) {
                    return Some(days);
                }
            }
        }
    }
    None
}

/// Days since the Unix epoch for a date embedded in a WHOIS value. Only the
/// ISO `YYYY-MM-DD` shape is recognized; registries overwhelmingly use it,
/// and a missed format just degrades to "unknown".
fn parse_date_days(date_str: &str) -> Option<f64> {
    let iso = Regex::new(r"(\d{4})-(\d{2})-(\d{2})").ok()?;
    let captures = iso.captures(date_str)?;
    let year: u32 = captures[1].parse().ok()?;
    let month: u32 = captures[2].parse().ok()?;
    let day: u32 = captures[3].parse().ok()?;
    days_since_epoch(year, month, day)
}

/// Approximate day count since 1970-01-01. Good enough for age thresholds
/// measured in months or years.
fn days_since_epoch(year: u32, month: u32, day: u32) -> Option<f64> {
    if year < 1970 || month == 0 || month > 12 || day == 0 || day > 31 {
        return None;
    }
    let years = (year - 1970) as f64;
    let mut days = years * 365.0 + (years / 4.0).floor();
    let days_in_month = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    for m in 1..month {
        days += days_in_month[(m - 1) as usize] as f64;
    }
    days += day as f64 - 1.0;
    Some(days)
}

fn days_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as f64
        / 86_400.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn offline_analyzer() -> DomainTrustAnalyzer {
        let mut config = Config::default();
        config.whois.enabled = false;
        DomainTrustAnalyzer::new(&config, Arc::new(UrlGuard::new()))
    }

    #[test]
    fn test_abnormal_domain_pattern() {
        assert_eq!(abnormal_domain_pattern(""), 0);
        assert_eq!(abnormal_domain_pattern("example.com"), 0);
        assert_eq!(abnormal_domain_pattern("a.b.c.example.com"), 1); // > 2 dots
        assert_eq!(abnormal_domain_pattern("secure-login-update.com"), 1); // >= 2 hyphens
        assert_eq!(abnormal_domain_pattern("a1b2c3d4.com"), 1); // > 3 digits
        let long = format!("{}.com", "a".repeat(41));
        assert_eq!(abnormal_domain_pattern(&long), 1); // > 40 chars
    }

    #[test]
    fn test_derive_very_new_three_valued() {
        assert_eq!(derive_very_new(None), None);
        assert_eq!(derive_very_new(Some(5.0)), Some(1.0));
        assert_eq!(derive_very_new(Some(29.9)), Some(1.0));
        assert_eq!(derive_very_new(Some(30.0)), Some(0.0));
        assert_eq!(derive_very_new(Some(4000.0)), Some(0.0));
    }

    #[test]
    fn test_extract_root_domain() {
        assert_eq!(extract_root_domain("example.com"), "example.com");
        assert_eq!(extract_root_domain("mail.example.com"), "example.com");
        assert_eq!(extract_root_domain("a.b.example.org"), "example.org");
        assert_eq!(extract_root_domain("mail.example.co.uk"), "example.co.uk");
        assert_eq!(extract_root_domain("single"), "single");
    }

    #[test]
    fn test_whois_server_selection() {
        assert_eq!(whois_server_for("example.com"), "whois.verisign-grs.com");
        assert_eq!(whois_server_for("example.org"), "whois.pir.org");
        assert_eq!(whois_server_for("example.dev"), "whois.iana.org");
    }

    #[test]
    fn test_parse_whois_text_creation_and_expiry() {
        let text = "Domain Name: EXAMPLE.COM\n\
                    Creation Date: 1995-08-14T04:00:00Z\n\
                    Registry Expiry Date: 2026-08-13T04:00:00Z\n";
        let info = parse_whois_text(text).unwrap();
        let age = info.age_days.unwrap();
        assert!(age > 10_000.0, "age was {age}");
        let reg = info.registration_years.unwrap();
        assert!((reg - 31.0).abs() < 1.0, "registration was {reg}");
    }

    #[test]
    fn test_parse_whois_text_no_dates() {
        assert!(parse_whois_text("No match for domain").is_err());
    }

    #[test]
    fn test_parse_whois_text_creation_only() {
        let text = "created: 2024-01-15\n";
        let info = parse_whois_text(text).unwrap();
        assert!(info.age_days.is_some());
        assert!(info.registration_years.is_none());
    }

    #[tokio::test]
    async fn test_offline_extraction_shape() {
        let analyzer = offline_analyzer();
        let pairs = analyzer.extract("https://example.com", true).await;
        let names: Vec<&str> = pairs.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "domain_age_days",
                "registration_length_years",
                "dns_record_exists",
                "abnormal_domain_pattern",
                "domain_very_new",
            ]
        );
        assert_eq!(pairs[0].1, None);
        assert_eq!(pairs[1].1, None);
        assert_eq!(pairs[2].1, None);
        assert_eq!(pairs[3].1, Some(0.0));
        assert_eq!(pairs[4].1, None);
    }

    #[tokio::test]
    async fn test_abnormal_pattern_needs_no_lookup() {
        let analyzer = offline_analyzer();
        let pairs = analyzer
            .extract("https://login-secure-update.example.com", true)
            .await;
        let abnormal = pairs
            .iter()
            .find(|(n, _)| *n == "abnormal_domain_pattern")
            .unwrap()
            .1;
        assert_eq!(abnormal, Some(1.0));
    }

    #[tokio::test]
    async fn test_guard_blocks_lookups_for_private_hosts() {
        let analyzer = offline_analyzer();
        let pairs = analyzer.extract("http://127.0.0.1/admin", false).await;
        // No lookup traffic for a guarded target: everything stays unknown
        // except the offline heuristic.
        assert_eq!(pairs[0].1, None);
        assert_eq!(pairs[2].1, None);
        assert_eq!(pairs[3].1, Some(1.0));
    }

    #[tokio::test]
    async fn test_unparsable_url_is_offline_defaults() {
        let analyzer = offline_analyzer();
        let pairs = analyzer.extract("::not a url::", false).await;
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[3].1, Some(0.0));
    }
}
