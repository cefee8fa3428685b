use crate::classifier::Scoreable;
use serde::Serialize;

/// Classification quality over a labeled set. Labels: 1 = phishing,
/// 0 = legitimate. Undefined ratios (no positive predictions, no positive
/// labels) degrade to 0 instead of dividing by zero.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Rows = true class, columns = predicted class: [[tn, fp], [fn, tp]].
    pub confusion_matrix: [[usize; 2]; 2],
}

pub fn evaluate(y_true: &[u8], y_pred: &[u8]) -> Evaluation {
    let n = y_true.len().min(y_pred.len());
    let mut tn = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut tp = 0usize;

    for i in 0..n {
        match (y_true[i], y_pred[i]) {
            (0, 0) => tn += 1,
            (0, _) => fp += 1,
            (_, 0) => fn_ += 1,
            _ => tp += 1,
        }
    }

    let accuracy = if n > 0 {
        (tp + tn) as f64 / n as f64
    } else {
        0.0
    };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Evaluation {
        accuracy,
        precision,
        recall,
        f1,
        confusion_matrix: [[tn, fp], [fn_, tp]],
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Global feature importances sorted descending, for models that carry
/// them. Empty when the capability is absent.
pub fn top_importances(
    model: &dyn Scoreable,
    feature_names: &[String],
    top_k: usize,
) -> Vec<(String, f64)> {
    let Some(importances) = model.importances() else {
        return Vec::new();
    };
    let mut pairs: Vec<(String, f64)> = feature_names
        .iter()
        .zip(importances.iter())
        .map(|(n, &i)| (n.clone(), i))
        .collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs.truncate(top_k);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LinearModel;

    #[test]
    fn test_confusion_matrix_and_scores() {
        let y_true = [1, 1, 0, 0, 1, 0];
        let y_pred = [1, 0, 0, 1, 1, 0];
        let eval = evaluate(&y_true, &y_pred);
        assert_eq!(eval.confusion_matrix, [[2, 1], [1, 2]]);
        assert!((eval.accuracy - 4.0 / 6.0).abs() < 1e-9);
        assert!((eval.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((eval.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((eval.f1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        let eval = evaluate(&[], &[]);
        assert_eq!(eval.accuracy, 0.0);
        assert_eq!(eval.precision, 0.0);

        // All-negative predictions: precision undefined, degrades to 0.
        let eval = evaluate(&[1, 1], &[0, 0]);
        assert_eq!(eval.precision, 0.0);
        assert_eq!(eval.recall, 0.0);
        assert_eq!(eval.f1, 0.0);
    }

    #[test]
    fn test_top_importances() {
        let model = LinearModel {
            weights: vec![0.0; 3],
            bias: 0.0,
            feature_importances: Some(vec![0.1, 0.7, 0.2]),
        };
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let top = top_importances(&model, &names, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "b");
        assert_eq!(top[1].0, "c");

        let bare = LinearModel {
            weights: vec![0.0; 3],
            bias: 0.0,
            feature_importances: None,
        };
        assert!(top_importances(&bare, &names, 5).is_empty());
    }
}
