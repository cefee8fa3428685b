use crate::config::Config;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use url::{Host, Url};

/// Caps applied to raw lengths so outlier URLs cannot dominate a numeric
/// model.
const URL_LENGTH_CAP: usize = 500;
const PATH_LENGTH_CAP: usize = 300;
const QUERY_LENGTH_CAP: usize = 200;

const SPECIAL_CHARS: &str = "@-_?=&%#";

/// Lexical feature extraction over the URL string alone. No I/O, and total:
/// any input, however malformed, yields the full default vector.
pub struct LexicalAnalyzer {
    keywords: Vec<String>,
    shorteners: Vec<String>,
}

impl LexicalAnalyzer {
    pub fn new(config: &Config) -> Self {
        Self {
            keywords: config
                .suspicious_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            shorteners: config
                .shortener_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    /// Extract the lexical feature pairs in canonical emission order.
    pub fn extract(&self, url: &str) -> Vec<(&'static str, f64)> {
        let url = url.trim();
        if url.is_empty() {
            return self.defaults();
        }

        let normalized = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let parsed = match Url::parse(&normalized) {
            Ok(p) => p,
            Err(_) => return self.defaults(),
        };

        let host = parsed
            .host_str()
            .unwrap_or("")
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_lowercase();
        let path = parsed.path();
        let query = parsed.query().unwrap_or("");
        let full_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };

        let url_len = normalized.chars().count();
        let num_dots_domain = host.matches('.').count();
        let num_subdomains = num_dots_domain.saturating_sub(1);

        let is_ip_host = matches!(parsed.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));

        // Scanned over the whole decoded URL: phishing keywords show up in
        // crafted hostnames at least as often as in paths.
        let decoded_url = percent_decode_str(&normalized)
            .decode_utf8_lossy()
            .to_lowercase();
        let keyword_count = self
            .keywords
            .iter()
            .filter(|k| decoded_url.contains(k.as_str()))
            .count();

        let is_shortener = self
            .shorteners
            .iter()
            .any(|d| host.ends_with(d.as_str()) || host == *d);

        let entropy_input = if full_path.is_empty() {
            normalized.as_str()
        } else {
            full_path.as_str()
        };

        let digit_count = normalized.chars().filter(|c| c.is_ascii_digit()).count();

        vec![
            ("url_length", url_len.min(URL_LENGTH_CAP) as f64),
            ("path_length", path.chars().count().min(PATH_LENGTH_CAP) as f64),
            (
                "query_length",
                query.chars().count().min(QUERY_LENGTH_CAP) as f64,
            ),
            ("num_dots_url", normalized.matches('.').count() as f64),
            ("num_dots_domain", num_dots_domain as f64),
            ("num_subdomains", num_subdomains as f64),
            (
                "has_at_symbol",
                if normalized.contains('@') { 1.0 } else { 0.0 },
            ),
            ("num_hyphens", normalized.matches('-').count() as f64),
            ("num_underscores", normalized.matches('_').count() as f64),
            (
                "num_special_chars",
                normalized
                    .chars()
                    .filter(|c| SPECIAL_CHARS.contains(*c))
                    .count() as f64,
            ),
            ("has_ip_in_url", if is_ip_host { 1.0 } else { 0.0 }),
            (
                "uses_https",
                if parsed.scheme() == "https" { 1.0 } else { 0.0 },
            ),
            ("suspicious_keyword_count", keyword_count as f64),
            (
                "has_suspicious_keyword",
                if keyword_count > 0 { 1.0 } else { 0.0 },
            ),
            ("is_url_shortener", if is_shortener { 1.0 } else { 0.0 }),
            ("url_entropy", round4(shannon_entropy(entropy_input))),
            ("domain_entropy", round4(shannon_entropy(&host))),
            (
                "digit_ratio",
                round4(digit_count as f64 / url_len.max(1) as f64),
            ),
        ]
    }

    /// Full default vector for invalid or empty input. Same keys, same order
    /// as [`extract`], everything zeroed.
    pub fn defaults(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("url_length", 0.0),
            ("path_length", 0.0),
            ("query_length", 0.0),
            ("num_dots_url", 0.0),
            ("num_dots_domain", 0.0),
            ("num_subdomains", 0.0),
            ("has_at_symbol", 0.0),
            ("num_hyphens", 0.0),
            ("num_underscores", 0.0),
            ("num_special_chars", 0.0),
            ("has_ip_in_url", 0.0),
            ("uses_https", 0.0),
            ("suspicious_keyword_count", 0.0),
            ("has_suspicious_keyword", 0.0),
            ("is_url_shortener", 0.0),
            ("url_entropy", 0.0),
            ("domain_entropy", 0.0),
            ("digit_ratio", 0.0),
        ]
    }
}

/// Shannon entropy over the character distribution. Empty input is defined
/// as 0. Bounded above by log2 of the alphabet size.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, u32> = HashMap::new();
    let mut n = 0u32;
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
        n += 1;
    }
    let n = n as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
