use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Process-wide scan configuration: external-call limits and the fixed
/// signal lists shared by every extraction. All fields default so an absent
/// or partial config file still yields a working scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub whois: WhoisConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    /// Directory holding model.json, feature_names.json and the optional
    /// scaler.json produced by training.
    #[serde(default = "default_model_dir")]
    pub model_dir: String,
    #[serde(default = "default_suspicious_keywords")]
    pub suspicious_keywords: Vec<String>,
    #[serde(default = "default_shortener_domains")]
    pub shortener_domains: Vec<String>,
    #[serde(default = "default_urgency_patterns")]
    pub urgency_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_fetch_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisConfig {
    /// Disable to force every WHOIS-backed feature to "unknown" without
    /// touching the network.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_whois_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_whois_cache_ttl")]
    pub cache_ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_dns_timeout")]
    pub timeout_seconds: u64,
}

fn default_model_dir() -> String {
    "models".to_string()
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_fetch_max_bytes() -> usize {
    100_000
}

fn default_user_agent() -> String {
    format!("phishguard/{} (security research)", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_whois_timeout() -> u64 {
    10
}

fn default_whois_cache_ttl() -> u64 {
    24
}

fn default_dns_timeout() -> u64 {
    5
}

fn default_suspicious_keywords() -> Vec<String> {
    [
        "login",
        "signin",
        "verify",
        "update",
        "secure",
        "account",
        "banking",
        "paypal",
        "amazon",
        "apple",
        "microsoft",
        "confirm",
        "suspend",
        "restore",
        "password",
        "credential",
        "urgent",
        "click",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_shortener_domains() -> Vec<String> {
    [
        "bit.ly",
        "tinyurl.com",
        "goo.gl",
        "t.co",
        "ow.ly",
        "is.gd",
        "buff.ly",
        "adf.ly",
        "bit.do",
        "lnkd.in",
        "db.tt",
        "qr.ae",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_urgency_patterns() -> Vec<String> {
    [
        r"\b(urgent|immediately|asap|verify\s+now|confirm\s+now|act\s+now)\b",
        r"\b(suspend|suspended|restore\s+account|locked\s+account)\b",
        r"\b(warning|attention\s+required|action\s+required)\b",
        r"\b(click\s+here|verify\s+your\s+identity|confirm\s+your\s+identity)\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            max_bytes: default_fetch_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: default_whois_timeout(),
            cache_ttl_hours: default_whois_cache_ttl(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_dns_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            whois: WhoisConfig::default(),
            dns: DnsConfig::default(),
            model_dir: default_model_dir(),
            suspicious_keywords: default_suspicious_keywords(),
            shortener_domains: default_shortener_domains(),
            urgency_patterns: default_urgency_patterns(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file when present, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if Path::new(path).exists() {
            Self::load_from_file(path)
        } else {
            log::debug!("no config file at {path}, using defaults");
            Ok(Self::default())
        }
    }

    pub fn generate_default(path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(&Self::default())?;
        fs::write(path, yaml)?;
        Ok(())
    }
}
