use thiserror::Error;

/// Errors raised by the safe-fetch guard. `Invalid` and `UnsafeTarget` are
/// kept distinct so telemetry can tell malformed input apart from SSRF
/// attempts, even though both block the fetch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("invalid URL: {0}")]
    Invalid(String),
    #[error("unsafe target: {0}")]
    UnsafeTarget(String),
}

/// Errors that cross the prediction boundary. Extractor-internal failures
/// (WHOIS/DNS/fetch) never appear here; they are recovered into sentinel
/// values inside the extractors.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("model artifact missing: {0}")]
    ArtifactMissing(String),
    #[error("failed to load model artifact {path}: {source}")]
    ArtifactLoad {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("feature order mismatch at position {position}: expected `{expected}`, got `{got}`")]
    FeatureOrderMismatch {
        position: usize,
        expected: String,
        got: String,
    },
    #[error(transparent)]
    Guard(#[from] GuardError),
}
