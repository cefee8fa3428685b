use crate::error::GuardError;
use regex::Regex;
use url::Url;

/// Maximum accepted URL length. Longer input is rejected before parsing.
pub const MAX_URL_LENGTH: usize = 2048;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Validates and normalizes URLs before any outbound request is issued.
///
/// This is the single authority consulted before every fetch in the
/// pipeline: it blocks non-HTTP schemes (`file`, `ftp`, `data`,
/// `javascript`, ...) and hostnames that would let a crafted URL probe the
/// internal network (localhost, RFC 1918 ranges, `::1`).
pub struct UrlGuard {
    private_host: Regex,
}

impl UrlGuard {
    pub fn new() -> Self {
        Self {
            // Anchored prefix match on the hostname. `0.*` also covers the
            // 0.0.0.0 "this host" range.
            private_host: Regex::new(
                r"(?i)^(localhost|127\.|10\.|172\.(1[6-9]|2[0-9]|3[01])\.|192\.168\.|0\.|::1)",
            )
            .expect("private host pattern is valid"),
        }
    }

    /// Normalize a URL for consistent parsing: trim whitespace, default a
    /// missing scheme to `https`, reject oversized input and disallowed
    /// schemes. Does not fetch or resolve anything.
    pub fn normalize(&self, url: &str) -> Result<String, GuardError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(GuardError::Invalid("URL is empty".to_string()));
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(GuardError::Invalid(format!(
                "URL exceeds maximum length ({MAX_URL_LENGTH})"
            )));
        }

        let candidate = match split_scheme(url) {
            Some(scheme) => {
                let scheme = scheme.to_lowercase();
                if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
                    return Err(GuardError::Invalid(format!("scheme not allowed: {scheme}")));
                }
                url.to_string()
            }
            None => format!("https://{url}"),
        };

        match Url::parse(&candidate) {
            Ok(_) => Ok(candidate),
            Err(e) => Err(GuardError::Invalid(format!("unparsable URL: {e}"))),
        }
    }

    /// Check whether a URL is safe for an outbound request. Returns
    /// `(true, None)` when safe, `(false, Some(reason))` otherwise.
    pub fn is_safe(&self, url: &str) -> (bool, Option<String>) {
        match self.check(url) {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    /// Same check as [`is_safe`], with the typed error preserved so callers
    /// can distinguish malformed input from blocked targets.
    pub fn check(&self, url: &str) -> Result<(), GuardError> {
        let normalized = self.normalize(url)?;
        let parsed = Url::parse(&normalized)
            .map_err(|e| GuardError::Invalid(format!("unparsable URL: {e}")))?;

        let host = parsed.host_str().unwrap_or("").trim().to_string();
        if host.is_empty() {
            return Err(GuardError::Invalid("missing hostname".to_string()));
        }
        // `url` brackets IPv6 hosts; strip so `[::1]` matches the pattern.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if self.private_host.is_match(host) {
            return Err(GuardError::UnsafeTarget(format!(
                "private or localhost hostname not allowed: {host}"
            )));
        }
        Ok(())
    }
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Return the scheme part of `url` if it carries one (`scheme://...` or
/// `scheme:` for non-hierarchical schemes like `javascript:`).
fn split_scheme(url: &str) -> Option<&str> {
    let colon = url.find(':')?;
    let scheme = &url[..colon];
    if scheme.is_empty() {
        return None;
    }
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
        Some(scheme)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_defaults_scheme() {
        let guard = UrlGuard::new();
        assert_eq!(
            guard.normalize("example.com/login").unwrap(),
            "https://example.com/login"
        );
        assert_eq!(
            guard.normalize("http://example.com").unwrap(),
            "http://example.com"
        );
    }

    #[test]
    fn test_normalize_rejects_empty_and_oversized() {
        let guard = UrlGuard::new();
        assert!(matches!(guard.normalize(""), Err(GuardError::Invalid(_))));
        assert!(matches!(guard.normalize("   "), Err(GuardError::Invalid(_))));
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(guard.normalize(&long), Err(GuardError::Invalid(_))));
    }

    #[test]
    fn test_disallowed_schemes() {
        let guard = UrlGuard::new();
        for url in [
            "file:///etc/passwd",
            "ftp://example.com/pub",
            "javascript:alert(1)",
            "data:text/html,<h1>x</h1>",
            "vbscript:msgbox(1)",
        ] {
            let (safe, reason) = guard.is_safe(url);
            assert!(!safe, "{url} should be rejected");
            assert!(reason.is_some());
        }
    }

    #[test]
    fn test_private_hosts_blocked() {
        let guard = UrlGuard::new();
        for url in [
            "http://127.0.0.1/x",
            "http://localhost/admin",
            "http://10.0.0.5/",
            "http://172.16.1.1/",
            "http://172.31.200.9/",
            "http://192.168.1.1/router",
            "http://0.0.0.0/",
            "http://[::1]/",
        ] {
            let (safe, reason) = guard.is_safe(url);
            assert!(!safe, "{url} should be unsafe");
            assert!(reason.is_some());
        }
        // 172.32.* is outside the private block
        let (safe, _) = guard.is_safe("http://172.32.0.1/");
        assert!(safe);
    }

    #[test]
    fn test_public_hosts_allowed() {
        let guard = UrlGuard::new();
        let (safe, reason) = guard.is_safe("https://example.com");
        assert!(safe);
        assert!(reason.is_none());
        let (safe, _) = guard.is_safe("example.com/no-scheme");
        assert!(safe);
    }

    #[test]
    fn test_unsafe_target_distinct_from_invalid() {
        let guard = UrlGuard::new();
        assert!(matches!(
            guard.check("http://127.0.0.1/x"),
            Err(GuardError::UnsafeTarget(_))
        ));
        assert!(matches!(
            guard.check("file:///etc/passwd"),
            Err(GuardError::Invalid(_))
        ));
    }
}
