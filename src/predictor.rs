use crate::classifier::{ArtifactCache, Scoreable, StandardScaler};
use crate::config::Config;
use crate::error::PredictError;
use crate::features::{ExtractOptions, FeatureExtractor, FeatureVector};
use serde::Serialize;
use std::path::PathBuf;

/// Keeps a zero-valued feature from vanishing out of the ranking entirely
/// when its global importance is high. Carried over from training-side
/// tooling; the exact constant is a placeholder heuristic, not a contract.
const CONTRIBUTION_EPSILON: f64 = 1e-6;
const TOP_CONTRIBUTIONS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub name: String,
    pub contribution: f64,
}

/// The structured result handed to the serving layer. Exactly one of
/// `classification`/`risk_score` and `error` is populated; a failed
/// prediction never surfaces as an unhandled fault.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub url: String,
    pub classification: Option<String>,
    pub risk_score: Option<f64>,
    pub top_contributing_features: Vec<Contribution>,
    pub error: Option<String>,
}

/// Score an assembled vector with a trained classifier.
///
/// Returns the class label, a 0-100 risk score (one decimal), and the
/// ranked contribution list. The contribution proxy
/// `importance x (|value| + epsilon)` is an uncalibrated approximation of
/// per-sample attribution. It tells an operator which signals drove a
/// verdict; it is not an exact decomposition of the probability.
pub fn score_features(
    vector: &FeatureVector,
    feature_names: &[String],
    model: &dyn Scoreable,
    scaler: Option<&StandardScaler>,
) -> Result<(String, f64, Vec<(String, f64)>), PredictError> {
    let raw = vector.aligned_values(feature_names)?;

    // Importance-carrying models are trained on raw features; the scaler
    // only applies to the linear path.
    let x = if model.importances().is_none() {
        match scaler {
            Some(s) => s.transform(&raw),
            None => raw.clone(),
        }
    } else {
        raw.clone()
    };

    let probability = match model.probability(&x) {
        Some(p) => p.clamp(0.0, 1.0),
        // Hard-prediction-only classifier: degrade to a saturated
        // probability so scoring still works, at the cost of a useful
        // risk gradient.
        None => f64::from(model.predict(&x)),
    };

    let risk_score = round1(probability * 100.0).clamp(0.0, 100.0);
    let label = if probability >= 0.5 {
        "Phishing"
    } else {
        "Legitimate"
    };

    let mut contributions: Vec<(String, f64)> = Vec::new();
    if let Some(importances) = model.importances() {
        let mut ranked: Vec<(String, f64)> = feature_names
            .iter()
            .zip(x.iter())
            .zip(importances.iter())
            .map(|((name, value), imp)| {
                (name.clone(), imp * (value.abs() + CONTRIBUTION_EPSILON))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        contributions = ranked
            .into_iter()
            .filter(|(_, c)| *c > 0.0)
            .take(TOP_CONTRIBUTIONS)
            .map(|(n, c)| (n, round4(c)))
            .collect();
    }

    Ok((label.to_string(), risk_score, contributions))
}

/// End-to-end serving path: extract features for a URL, score them with the
/// cached model artifacts, and explain the verdict.
pub struct Predictor {
    extractor: FeatureExtractor,
    cache: ArtifactCache,
    model_dir: PathBuf,
}

impl Predictor {
    pub fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            extractor: FeatureExtractor::new(config)?,
            cache: ArtifactCache::new(),
            model_dir: PathBuf::from(&config.model_dir),
        })
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Drop cached artifacts so the next prediction reloads from disk.
    pub fn reload_artifacts(&self) {
        self.cache.reset();
    }

    /// Raw-tuple variant of the serving contract: propagates the typed
    /// error instead of wrapping it.
    pub async fn predict_raw(
        &self,
        url: &str,
        fetch_content: bool,
    ) -> Result<(String, f64, Vec<(String, f64)>), PredictError> {
        let artifacts = self.cache.get_or_load(&self.model_dir)?;
        let opts = ExtractOptions {
            html: None,
            fetch_content,
            skip_external_lookups: false,
        };
        let vector = self.extractor.extract(url, &opts).await?;
        score_features(
            &vector,
            &artifacts.feature_names,
            artifacts.model.as_ref(),
            artifacts.scaler.as_ref(),
        )
    }

    /// Classify a URL, returning a structured result. Every internal
    /// failure is caught here and surfaced through the `error` field.
    pub async fn predict(&self, url: &str, fetch_content: bool) -> PredictionResult {
        match self.predict_raw(url, fetch_content).await {
            Ok((classification, risk_score, top)) => PredictionResult {
                url: url.to_string(),
                classification: Some(classification),
                risk_score: Some(risk_score),
                top_contributing_features: top
                    .into_iter()
                    .map(|(name, contribution)| Contribution { name, contribution })
                    .collect(),
                error: None,
            },
            Err(e) => {
                log::error!("prediction failed for {url}: {e}");
                PredictionResult {
                    url: url.to_string(),
                    classification: None,
                    risk_score: None,
                    top_contributing_features: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{LinearModel, MODEL_FILENAME, FEATURE_NAMES_FILENAME};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ImportanceModel {
        importances: Vec<f64>,
    }

    impl Scoreable for ImportanceModel {
        fn predict(&self, _features: &[f64]) -> u8 {
            1
        }
        fn probability(&self, _features: &[f64]) -> Option<f64> {
            Some(0.9)
        }
        fn importances(&self) -> Option<&[f64]> {
            Some(&self.importances)
        }
    }

    struct HardOnly(u8);

    impl Scoreable for HardOnly {
        fn predict(&self, _features: &[f64]) -> u8 {
            self.0
        }
    }

    fn vector_of(pairs: &[(&str, f64)]) -> (FeatureVector, Vec<String>) {
        let names: Vec<String> = pairs.iter().map(|(n, _)| n.to_string()).collect();
        let vector = crate::features::testing::vector_from_pairs(
            pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        );
        (vector, names)
    }

    #[test]
    fn test_risk_score_bounds_and_labels() {
        let (v, names) = vector_of(&[("a", 1.0)]);
        for (p, expected_label) in [(0.0, "Legitimate"), (0.49, "Legitimate"), (0.5, "Phishing"), (1.0, "Phishing")] {
            struct Fixed(f64);
            impl Scoreable for Fixed {
                fn predict(&self, _f: &[f64]) -> u8 {
                    u8::from(self.0 >= 0.5)
                }
                fn probability(&self, _f: &[f64]) -> Option<f64> {
                    Some(self.0)
                }
            }
            let (label, risk, _) = score_features(&v, &names, &Fixed(p), None).unwrap();
            assert_eq!(label, expected_label, "p = {p}");
            assert!((0.0..=100.0).contains(&risk));
            assert!((risk - p * 100.0).abs() < 0.051);
        }
    }

    #[test]
    fn test_hard_prediction_degrades_gracefully() {
        let (v, names) = vector_of(&[("a", 1.0)]);
        let (label, risk, top) = score_features(&v, &names, &HardOnly(1), None).unwrap();
        assert_eq!(label, "Phishing");
        assert_eq!(risk, 100.0);
        assert!(top.is_empty());

        let (label, risk, _) = score_features(&v, &names, &HardOnly(0), None).unwrap();
        assert_eq!(label, "Legitimate");
        assert_eq!(risk, 0.0);
    }

    #[test]
    fn test_contribution_ranking() {
        let (v, names) = vector_of(&[("big", 2.0), ("dead", 5.0), ("zeroed", 0.0)]);
        let model = ImportanceModel {
            importances: vec![0.5, 0.0, 0.3],
        };
        let (_, _, top) = score_features(&v, &names, &model, None).unwrap();
        // Zero-importance features are excluded; zero-valued features keep
        // an epsilon-sized contribution.
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "big");
        assert_eq!(top[1].0, "zeroed");
        assert!(top[0].1 > top[1].1);
    }

    #[test]
    fn test_contribution_top_ten_cap() {
        let pairs: Vec<(String, f64)> = (0..15).map(|i| (format!("f{i}"), 1.0)).collect();
        let pair_refs: Vec<(&str, f64)> = pairs.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        let (v, names) = vector_of(&pair_refs);
        let model = ImportanceModel {
            importances: (0..15).map(|i| 0.1 + i as f64 * 0.01).collect(),
        };
        let (_, _, top) = score_features(&v, &names, &model, None).unwrap();
        assert_eq!(top.len(), 10);
        // Ranked descending
        assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_scaler_applied_only_without_importances() {
        let (v, names) = vector_of(&[("a", 10.0)]);
        let scaler = StandardScaler {
            mean: vec![10.0],
            scale: vec![1.0],
        };
        // Linear model without importances: scaled input -> decision at 0.
        let model = LinearModel {
            weights: vec![5.0],
            bias: 0.0,
            feature_importances: None,
        };
        let (_, risk, _) = score_features(&v, &names, &model, Some(&scaler)).unwrap();
        assert_eq!(risk, 50.0);

        // Same model carrying importances: raw input, saturated decision.
        let model = LinearModel {
            weights: vec![5.0],
            bias: 0.0,
            feature_importances: Some(vec![1.0]),
        };
        let (_, risk, _) = score_features(&v, &names, &model, Some(&scaler)).unwrap();
        assert_eq!(risk, 100.0);
    }

    #[test]
    fn test_order_mismatch_is_loud() {
        let (v, _) = vector_of(&[("a", 1.0), ("b", 2.0)]);
        let wrong = vec!["a".to_string(), "c".to_string()];
        let err = score_features(&v, &wrong, &HardOnly(0), None).unwrap_err();
        assert!(matches!(err, PredictError::FeatureOrderMismatch { .. }));
    }

    fn temp_model_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "phishguard-predictor-{}-{}-{}",
            name,
            std::process::id(),
            n
        ))
    }

    #[tokio::test]
    async fn test_predict_surfaces_missing_artifacts_as_error() {
        let dir = temp_model_dir("missing");
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = Config::default();
        config.model_dir = dir.display().to_string();
        config.whois.enabled = false;
        let predictor = Predictor::new(&config).unwrap();

        let result = predictor.predict("https://example.com", false).await;
        assert!(result.error.is_some());
        assert!(result.classification.is_none());
        assert!(result.risk_score.is_none());
        assert!(result.top_contributing_features.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_predict_end_to_end_with_artifacts() {
        let dir = temp_model_dir("e2e");
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::default();
        config.model_dir = dir.display().to_string();
        config.whois.enabled = false;

        // Write artifacts keyed to the real canonical order.
        let extractor = FeatureExtractor::new(&config).unwrap();
        let names: Vec<String> = extractor.feature_names().to_vec();
        let model = serde_json::json!({
            "model_type": "linear",
            "weights": vec![0.0; names.len()],
            "bias": 0.0,
        });
        std::fs::write(dir.join(MODEL_FILENAME), model.to_string()).unwrap();
        std::fs::write(
            dir.join(FEATURE_NAMES_FILENAME),
            serde_json::to_string(&names).unwrap(),
        )
        .unwrap();

        let predictor = Predictor::new(&config).unwrap();
        let result = predictor.predict("::not a url::", false).await;
        // Zero weights: probability 0.5, boundary-inclusive phishing.
        assert_eq!(result.classification.as_deref(), Some("Phishing"));
        assert_eq!(result.risk_score, Some(50.0));
        assert!(result.error.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
