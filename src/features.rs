use crate::config::Config;
use crate::content::ContentAnalyzer;
use crate::domain_trust::DomainTrustAnalyzer;
use crate::error::PredictError;
use crate::lexical::LexicalAnalyzer;
use crate::safe_url::UrlGuard;
use std::sync::Arc;

/// Fixed input used to derive the canonical feature order and to stand in
/// for URLs that cannot be processed at all during batch extraction.
pub const PLACEHOLDER_URL: &str = "https://example.com";

/// An assembled, canonically-ordered feature vector. Immutable once built;
/// every canonical feature name is present, with 0 substituted for signals
/// that were unavailable.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pairs: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.pairs.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> Vec<&str> {
        self.pairs.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.pairs.iter().map(|(_, v)| *v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Project the vector onto an externally supplied name order (the one a
    /// model was trained with). Any missing or extra key is a loud
    /// [`PredictError::FeatureOrderMismatch`] rather than a silent reorder:
    /// a mismatched column silently corrupts every downstream prediction.
    pub fn aligned_values(&self, names: &[String]) -> Result<Vec<f64>, PredictError> {
        if self.pairs.len() != names.len() {
            return Err(order_mismatch(
                names,
                &self.names(),
                self.pairs.len().min(names.len()),
            ));
        }
        let mut out = Vec::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            match self.get(name) {
                Some(v) => out.push(v),
                None => {
                    return Err(PredictError::FeatureOrderMismatch {
                        position,
                        expected: name.clone(),
                        got: "<missing>".to_string(),
                    })
                }
            }
        }
        Ok(out)
    }
}

/// Per-extraction options. Batch extraction overrides `skip_external_lookups`
/// to true; single-URL callers choose.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub html: Option<String>,
    pub fetch_content: bool,
    pub skip_external_lookups: bool,
}

/// One batch-extraction output row.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub url: String,
    pub features: FeatureVector,
    pub label: Option<u8>,
}

/// Merges the three extractors into one canonically-ordered vector.
///
/// The canonical order (lexical keys, then domain keys, then content keys)
/// is derived once against [`PLACEHOLDER_URL`] and is the contract binding
/// the classifier's positional input to feature names; training and
/// inference both route through this type.
pub struct FeatureExtractor {
    lexical: LexicalAnalyzer,
    domain: DomainTrustAnalyzer,
    content: ContentAnalyzer,
    canonical: Vec<String>,
}

impl FeatureExtractor {
    pub fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let guard = Arc::new(UrlGuard::new());
        let lexical = LexicalAnalyzer::new(config);
        let domain = DomainTrustAnalyzer::new(config, guard.clone());
        let content = ContentAnalyzer::new(config, guard)?;

        let mut extractor = Self {
            lexical,
            domain,
            content,
            canonical: Vec::new(),
        };
        extractor.canonical = extractor.derive_canonical_order();
        Ok(extractor)
    }

    /// Derive the canonical ordered key list by running every extractor
    /// against the placeholder input. Deterministic and idempotent.
    pub fn derive_canonical_order(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        names.extend(
            self.lexical
                .extract(PLACEHOLDER_URL)
                .iter()
                .map(|(n, _)| n.to_string()),
        );
        names.extend(
            self.domain
                .extract_offline(PLACEHOLDER_URL)
                .iter()
                .map(|(n, _)| n.to_string()),
        );
        names.extend(
            self.content
                .extract_from_html(PLACEHOLDER_URL, None)
                .iter()
                .map(|(n, _)| n.to_string()),
        );
        names
    }

    pub fn feature_names(&self) -> &[String] {
        &self.canonical
    }

    /// Assemble the complete feature vector for one URL. Domain-trust
    /// unknowns (`None`) are imputed to 0 here, at the merge boundary; the
    /// assembled output is checked against the canonical order and any
    /// disagreement fails loudly.
    pub async fn extract(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> Result<FeatureVector, PredictError> {
        let mut pairs: Vec<(String, f64)> = Vec::with_capacity(self.canonical.len());

        for (name, value) in self.lexical.extract(url) {
            pairs.push((name.to_string(), value));
        }
        for (name, value) in self.domain.extract(url, opts.skip_external_lookups).await {
            pairs.push((name.to_string(), value.unwrap_or(0.0)));
        }
        for (name, value) in self
            .content
            .extract(url, opts.html.as_deref(), opts.fetch_content)
            .await
        {
            pairs.push((name.to_string(), value));
        }

        self.validate_order(&pairs)?;
        Ok(FeatureVector { pairs })
    }

    /// Batch extraction for training: one row per input URL, in input
    /// order. A URL that cannot be processed gets the placeholder-input
    /// default row instead of aborting the batch, and keeps its label.
    /// External lookups are skipped (WHOIS against a large batch is both
    /// slow and rude to the registries).
    pub async fn extract_batch(
        &self,
        urls: &[String],
        labels: Option<&[u8]>,
        fetch_content: bool,
    ) -> Vec<FeatureRow> {
        let opts = ExtractOptions {
            html: None,
            fetch_content,
            skip_external_lookups: true,
        };

        let mut rows = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let features = match self.extract(url, &opts).await {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("batch extraction failed for {url}: {e}; using defaults");
                    match self.extract(PLACEHOLDER_URL, &opts).await {
                        Ok(v) => v,
                        Err(e) => {
                            log::error!("placeholder extraction failed: {e}");
                            self.zero_vector()
                        }
                    }
                }
            };
            let label = labels.and_then(|ls| ls.get(i).copied());
            rows.push(FeatureRow {
                url: url.clone(),
                features,
                label,
            });
        }
        rows
    }

    fn zero_vector(&self) -> FeatureVector {
        FeatureVector {
            pairs: self.canonical.iter().map(|n| (n.clone(), 0.0)).collect(),
        }
    }

    fn validate_order(&self, pairs: &[(String, f64)]) -> Result<(), PredictError> {
        for (position, (canonical, pair)) in self.canonical.iter().zip(pairs.iter()).enumerate() {
            if *canonical != pair.0 {
                return Err(PredictError::FeatureOrderMismatch {
                    position,
                    expected: canonical.clone(),
                    got: pair.0.clone(),
                });
            }
        }
        if pairs.len() != self.canonical.len() {
            let position = self.canonical.len().min(pairs.len());
            return Err(PredictError::FeatureOrderMismatch {
                position,
                expected: self
                    .canonical
                    .get(position)
                    .cloned()
                    .unwrap_or_else(|| "<none>".to_string()),
                got: pairs
                    .get(position)
                    .map(|(n, _)| n.clone())
                    .unwrap_or_else(|| "<missing>".to_string()),
            });
        }
        Ok(())
    }
}

fn order_mismatch(expected: &[String], got: &[&str], position: usize) -> PredictError {
    PredictError::FeatureOrderMismatch {
        position,
        expected: expected
            .get(position)
            .cloned()
            .unwrap_or_else(|| "<none>".to_string()),
        got: got
            .get(position)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "<missing>".to_string()),
    }
}

#[cfg(test)]
pub mod testing {
    use super::FeatureVector;

    /// Build a vector directly from pairs, bypassing the extractors. Test
    /// support only; production vectors always come out of the assembler.
    pub fn vector_from_pairs(pairs: Vec<(String, f64)>) -> FeatureVector {
        FeatureVector { pairs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FeatureExtractor {
        let mut config = Config::default();
        config.whois.enabled = false;
        FeatureExtractor::new(&config).unwrap()
    }

    fn opts_offline() -> ExtractOptions {
        ExtractOptions {
            skip_external_lookups: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_canonical_order_idempotent() {
        let e = extractor();
        let first = e.derive_canonical_order();
        let second = e.derive_canonical_order();
        assert_eq!(first, second);
        assert_eq!(first, e.feature_names());
    }

    #[tokio::test]
    async fn test_canonical_shape() {
        let e = extractor();
        let names = e.feature_names();
        assert_eq!(names.len(), 32);
        // Lexical first, domain in the middle, content last.
        assert_eq!(names[0], "url_length");
        assert_eq!(names[18], "domain_age_days");
        assert_eq!(names[23], "has_html_form");
        assert_eq!(names[31], "has_password_input");
    }

    #[tokio::test]
    async fn test_assembled_vector_matches_canonical() {
        let e = extractor();
        let v = e
            .extract("https://paypal-verify-urgent.secure-account.com", &opts_offline())
            .await
            .unwrap();
        assert_eq!(v.len(), 32);
        assert_eq!(
            v.names(),
            e.feature_names().iter().map(|s| s.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(v.get("has_suspicious_keyword"), Some(1.0));
        assert_eq!(v.get("uses_https"), Some(1.0));
        assert_eq!(v.get("is_url_shortener"), Some(0.0));
    }

    #[tokio::test]
    async fn test_unknowns_imputed_to_zero() {
        let e = extractor();
        let v = e.extract("https://example.com", &opts_offline()).await.unwrap();
        // Lookups skipped: unknown becomes 0 at the merge boundary.
        assert_eq!(v.get("domain_age_days"), Some(0.0));
        assert_eq!(v.get("domain_very_new"), Some(0.0));
        assert_eq!(v.get("dns_record_exists"), Some(0.0));
    }

    #[tokio::test]
    async fn test_malformed_url_still_full_vector() {
        let e = extractor();
        let v = e.extract("::not a url::", &opts_offline()).await.unwrap();
        assert_eq!(v.len(), 32);
        assert_eq!(v.get("url_length"), Some(0.0));
    }

    #[tokio::test]
    async fn test_batch_survives_malformed_urls() {
        let e = extractor();
        let urls = vec![
            "https://example.com".to_string(),
            "::not a url::".to_string(),
            "https://bit.ly/2xYz123".to_string(),
        ];
        let labels = vec![0u8, 1, 1];
        let rows = e.extract_batch(&urls, Some(&labels), false).await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].label, Some(1));
        assert_eq!(rows[1].features.len(), 32);
        assert_eq!(rows[2].features.get("is_url_shortener"), Some(1.0));
    }

    #[tokio::test]
    async fn test_batch_without_labels() {
        let e = extractor();
        let urls = vec!["https://example.com".to_string()];
        let rows = e.extract_batch(&urls, None, false).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, None);
    }

    #[tokio::test]
    async fn test_aligned_values_roundtrip() {
        let e = extractor();
        let v = e.extract("https://example.com", &opts_offline()).await.unwrap();
        let names: Vec<String> = e.feature_names().to_vec();
        let aligned = v.aligned_values(&names).unwrap();
        assert_eq!(aligned, v.values());
    }

    #[tokio::test]
    async fn test_aligned_values_rejects_unknown_name() {
        let e = extractor();
        let v = e.extract("https://example.com", &opts_offline()).await.unwrap();
        let mut names: Vec<String> = e.feature_names().to_vec();
        names[3] = "renamed_feature".to_string();
        let err = v.aligned_values(&names).unwrap_err();
        match err {
            PredictError::FeatureOrderMismatch { position, expected, .. } => {
                assert_eq!(position, 3);
                assert_eq!(expected, "renamed_feature");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_aligned_values_rejects_dropped_key() {
        let e = extractor();
        let v = e.extract("https://example.com", &opts_offline()).await.unwrap();
        let mut names: Vec<String> = e.feature_names().to_vec();
        names.pop();
        assert!(v.aligned_values(&names).is_err());
    }
}
