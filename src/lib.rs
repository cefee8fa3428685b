pub mod classifier;
pub mod config;
pub mod content;
pub mod domain_trust;
pub mod error;
pub mod features;
pub mod lexical;
pub mod metrics;
pub mod predictor;
pub mod safe_url;

pub use classifier::{ArtifactCache, Artifacts, LinearModel, Scoreable, StandardScaler};
pub use config::Config;
pub use error::{GuardError, PredictError};
pub use features::{ExtractOptions, FeatureExtractor, FeatureRow, FeatureVector};
pub use predictor::{PredictionResult, Predictor};
pub use safe_url::UrlGuard;
