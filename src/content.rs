use crate::config::Config;
use crate::safe_url::UrlGuard;
use regex::Regex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Caps keeping pathological pages from skewing the model.
const FORM_COUNT_CAP: usize = 10;
const IFRAME_COUNT_CAP: usize = 10;
const URGENCY_SCORE_CAP: usize = 5;

/// Markup-based feature extraction over fetched (or supplied) HTML.
///
/// These are intentionally cheap pattern-matching rules, not an HTML parser:
/// they tolerate malformed and truncated markup, and each rule trades some
/// false positives for coverage. A commented-out `alert(` inside a script
/// string still counts as a pop-up signal, and a form posting to a sibling
/// domain of the same operator still counts as an action mismatch.
pub struct ContentAnalyzer {
    client: Client,
    guard: Arc<UrlGuard>,
    max_bytes: usize,
    form_tag: Regex,
    form_action: Regex,
    password_input: Regex,
    js_redirect: Regex,
    popup: Regex,
    urgency: Vec<Regex>,
}

impl ContentAnalyzer {
    pub fn new(config: &Config, guard: Arc<UrlGuard>) -> Result<Self, Box<dyn std::error::Error>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch.timeout_seconds))
            .user_agent(config.fetch.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let urgency = config
            .urgency_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            client,
            guard,
            max_bytes: config.fetch.max_bytes,
            form_tag: Regex::new(r"<form[^>]*>")?,
            form_action: Regex::new(r#"(?i)<form[^>]*action\s*=\s*["']([^"']+)["']"#)?,
            password_input: Regex::new(r#"<input[^>]*type\s*=\s*["']password["']"#)?,
            js_redirect: Regex::new(r"window\.location\s*=|location\.href\s*=|location\.replace\s*\(")?,
            popup: Regex::new(r"window\.open\s*\(|alert\s*\(|confirm\s*\(")?,
            urgency,
        })
    }

    /// Extract the content feature pairs in canonical emission order. When
    /// `html` is absent and `fetch` is set, the page is retrieved through
    /// the safe-fetch guard; anything the guard rejects, and any fetch
    /// failure, degrades to the all-zero vector.
    pub async fn extract(
        &self,
        url: &str,
        html: Option<&str>,
        fetch: bool,
    ) -> Vec<(&'static str, f64)> {
        let fetched;
        let html = match html {
            Some(h) => Some(h),
            None if fetch => {
                fetched = self.fetch_html_safe(url).await;
                fetched.as_deref()
            }
            None => None,
        };
        self.extract_from_html(url, html)
    }

    /// Pure core over already-available HTML; also used to derive the
    /// canonical key order.
    pub fn extract_from_html(&self, url: &str, html: Option<&str>) -> Vec<(&'static str, f64)> {
        let html = match html {
            Some(h) if !h.is_empty() => h,
            _ => return self.defaults(),
        };

        let html_lower = html.to_lowercase();

        let num_forms = self.form_tag.find_iter(&html_lower).count().min(FORM_COUNT_CAP);
        let form_action_mismatch = self.detect_action_mismatch(url, html);
        let num_iframes = html_lower.matches("<iframe").count().min(IFRAME_COUNT_CAP);
        let urgency_score = self
            .urgency
            .iter()
            .filter(|p| p.is_match(&html_lower))
            .count()
            .min(URGENCY_SCORE_CAP);

        vec![
            ("has_html_form", if num_forms > 0 { 1.0 } else { 0.0 }),
            (
                "form_action_mismatch",
                if form_action_mismatch { 1.0 } else { 0.0 },
            ),
            ("num_forms", num_forms as f64),
            ("has_iframe", if num_iframes > 0 { 1.0 } else { 0.0 }),
            ("num_iframes", num_iframes as f64),
            (
                "has_js_redirect",
                if self.js_redirect.is_match(&html_lower) { 1.0 } else { 0.0 },
            ),
            (
                "has_popup",
                if self.popup.is_match(&html_lower) { 1.0 } else { 0.0 },
            ),
            ("urgency_language_score", urgency_score as f64),
            (
                "has_password_input",
                if self.password_input.is_match(&html_lower) { 1.0 } else { 0.0 },
            ),
        ]
    }

    fn defaults(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("has_html_form", 0.0),
            ("form_action_mismatch", 0.0),
            ("num_forms", 0.0),
            ("has_iframe", 0.0),
            ("num_iframes", 0.0),
            ("has_js_redirect", 0.0),
            ("has_popup", 0.0),
            ("urgency_language_score", 0.0),
            ("has_password_input", 0.0),
        ]
    }

    /// A form whose action host differs from the page host is a classic
    /// credential-exfiltration shape. Protocol-relative (`//host/...`) and
    /// root-relative (`/path`) actions resolve against the page host;
    /// fragment and `javascript:` actions are ignored.
    fn detect_action_mismatch(&self, url: &str, html: &str) -> bool {
        let page_host = match page_hostname(url) {
            Some(h) => h,
            None => return false,
        };

        for captures in self.form_action.captures_iter(html) {
            let action = match captures.get(1) {
                Some(m) => m.as_str().trim(),
                None => continue,
            };
            if action.is_empty() || action.starts_with('#') {
                continue;
            }
            let action_lower = action.to_lowercase();
            if action_lower.starts_with("javascript:") {
                continue;
            }

            let action_host = if let Some(rest) = action.strip_prefix("//") {
                host_of(&format!("https://{rest}"))
            } else if action.starts_with('/') {
                Some(page_host.clone())
            } else {
                host_of(action)
            };

            if let Some(action_host) = action_host {
                if !action_host.is_empty() && action_host != page_host {
                    return true;
                }
            }
        }
        false
    }

    async fn fetch_html_safe(&self, url: &str) -> Option<String> {
        if let Err(e) = self.guard.check(url) {
            log::debug!("content fetch blocked: {e}");
            return None;
        }
        let normalized = self.guard.normalize(url).ok()?;

        let response = match self.client.get(&normalized).send().await {
            Ok(r) => r,
            Err(e) => {
                log::debug!("content fetch failed for {normalized}: {e}");
                return None;
            }
        };
        let mut response = match response.error_for_status() {
            Ok(r) => r,
            Err(e) => {
                log::debug!("content fetch got error status for {normalized}: {e}");
                return None;
            }
        };

        // Stream until the byte cap; a truncated page is fine input for the
        // pattern rules.
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    if buf.len() >= self.max_bytes {
                        buf.truncate(self.max_bytes);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("body read ended early for {normalized}: {e}");
                    break;
                }
            }
        }

        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn page_hostname(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let normalized = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    host_of(&normalized)
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|h| h.to_lowercase())
}
