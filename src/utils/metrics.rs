//! Metrics Module for Model Evaluation
//!
//! Provides the metrics reported for a held-out split:
//! - Accuracy and sample-weighted loss
//! - Per-class precision, recall, F1-score and support
//! - Macro and support-weighted averages
//! - Confusion Matrix (row = actual, column = predicted)

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Index of the largest value. Exact ties resolve to the lowest index.
///
/// NaN entries never win. An empty slice yields 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best_idx = 0;
    let mut best = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    best_idx
}

/// Numerically stable softmax over a logits row
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Evaluation metrics for one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Sample-weighted mean cross-entropy, when the caller tracked it
    pub loss: Option<f64>,

    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,

    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,

    /// Per-class metrics, in label order
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from aligned predictions and ground truth labels
    ///
    /// Macro averages include every class, so a class with no support
    /// contributes zeros the way scikit-learn's report does.
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        debug_assert_eq!(predictions.len(), ground_truth.len());

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        let total_samples = confusion_matrix.total();
        let correct_predictions = confusion_matrix.correct();

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        let n = num_classes.max(1) as f64;
        let macro_precision = per_class.iter().map(|m| m.precision).sum::<f64>() / n;
        let macro_recall = per_class.iter().map(|m| m.recall).sum::<f64>() / n;
        let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / n;

        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total_samples == 0 {
                return 0.0;
            }
            per_class
                .iter()
                .map(|m| f(m) * m.support as f64)
                .sum::<f64>()
                / total_samples as f64
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy: confusion_matrix.accuracy(),
            loss: None,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_precision: weighted(|m| m.precision),
            weighted_recall: weighted(|m| m.recall),
            weighted_f1: weighted(|m| m.f1),
            per_class,
            confusion_matrix,
        }
    }

    /// Attach class names to the per-class entries
    pub fn with_class_names(mut self, names: &[String]) -> Self {
        for m in &mut self.per_class {
            m.class_name = names.get(m.class_idx).cloned();
        }
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }

    /// Text report laid out like scikit-learn's `classification_report`
    pub fn classification_report(&self) -> String {
        let names: Vec<String> = self
            .per_class
            .iter()
            .map(|m| {
                m.class_name
                    .clone()
                    .unwrap_or_else(|| m.class_idx.to_string())
            })
            .collect();
        let width = names
            .iter()
            .map(|n| n.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        let mut out = format!(
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            width = width
        );
        for (m, name) in self.per_class.iter().zip(&names) {
            out.push_str(&format!(
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
                name,
                m.precision,
                m.recall,
                m.f1,
                m.support,
                width = width
            ));
        }
        out.push('\n');
        out.push_str(&format!(
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_samples,
            width = width
        ));
        out.push_str(&format!(
            "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
            "macro avg",
            self.macro_precision,
            self.macro_recall,
            self.macro_f1,
            self.total_samples,
            width = width
        ));
        out.push_str(&format!(
            "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
            "weighted avg",
            self.weighted_precision,
            self.weighted_recall,
            self.weighted_f1,
            self.total_samples,
            width = width
        ));
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::from_predictions(&[], &[], 0)
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loss) = self.loss {
            writeln!(f, "Loss:        {:.4}", loss)?;
        }
        writeln!(f, "Accuracy:    {:.2}%", self.accuracy * 100.0)?;
        writeln!(f, "Macro F1:    {:.2}%", self.macro_f1 * 100.0)?;
        writeln!(f, "Weighted F1: {:.2}%", self.weighted_f1 * 100.0)?;
        write!(f, "Samples:     {}", self.total_samples)
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let predicted = cm.col_sums().get(class_idx).copied().unwrap_or(0);
        let support = cm.row_sums().get(class_idx).copied().unwrap_or(0);

        let false_positives = predicted - true_positives;
        let false_negatives = support - true_positives;

        let ratio = |num: usize, den: usize| {
            if den > 0 {
                num as f64 / den as f64
            } else {
                0.0
            }
        };
        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,

    /// Row = actual, column = predicted, flat row-major
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Add a single prediction. Out-of-range indices are ignored.
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Actual class counts
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predicted class counts
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Largest single cell, used to scale heatmaps
    pub fn max_count(&self) -> usize {
        self.matrix.iter().copied().max().unwrap_or(0)
    }

    /// Fixed-width text rendering with the diagonal bracketed
    pub fn display(&self, class_names: &[String]) -> String {
        let name = |i: usize| -> String {
            class_names
                .get(i)
                .map(|n| n.chars().take(10).collect())
                .unwrap_or_else(|| i.to_string())
        };

        let mut output = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");
        output.push_str(&format!("{:>12}", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>12}", name(col)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>12}", name(row)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("{:>12}", format!("[{}]", count)));
                } else {
                    output.push_str(&format!("{:>12}", count));
                }
            }
            output.push('\n');
        }
        output
    }

    /// Save to CSV with class names as headers
    pub fn save_csv(&self, path: &Path, class_names: &[String]) -> std::io::Result<()> {
        let name = |i: usize| {
            class_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| i.to_string())
        };

        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push_str(&format!(",{}", name(col)));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            content.push_str(&name(row));
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

/// Mean over samples where each batch contributes in proportion to its size
#[derive(Debug, Clone, Default)]
pub struct WeightedAverage {
    sum: f64,
    count: usize,
}

impl WeightedAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch mean covering `samples` items
    pub fn add(&mut self, batch_mean: f64, samples: usize) {
        self.sum += batch_mean * samples as f64;
        self.count += samples;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accuracy tracker for training
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        for (pred, gt) in predictions.iter().zip(ground_truth.iter()) {
            self.total += 1;
            if pred == gt {
                self.correct += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_unique_max() {
        assert_eq!(argmax(&[0.1, 2.5, -1.0, 0.3]), 1);
    }

    #[test]
    fn test_argmax_tie_prefers_lowest_index() {
        assert_eq!(argmax(&[0.5, 3.0, 1.0, 3.0]), 1);
        assert_eq!(argmax(&[2.0, 2.0, 2.0]), 0);
    }

    #[test]
    fn test_softmax_then_argmax() {
        let logits = [1.0, 4.0, 2.0, -3.0];
        let probs = softmax(&logits);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(argmax(&probs), 1);

        let tied = softmax(&[0.0, 7.0, 7.0, 1.0]);
        assert_eq!(argmax(&tied), 1);
    }

    #[test]
    fn test_softmax_large_logits_stay_finite() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_row_sums_match_true_class_counts() {
        let ground_truth = vec![0, 0, 0, 1, 1, 2, 3, 3, 3, 3];
        let predictions = vec![1, 0, 3, 1, 2, 2, 3, 0, 3, 3];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 4);
        assert_eq!(cm.row_sums(), vec![3, 2, 1, 4]);
        assert_eq!(cm.col_sums().iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.support, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_averages() {
        // class 0: p=1.0 r=0.5, class 1: p=0.5 r=1.0
        let predictions = vec![0, 1, 1];
        let ground_truth = vec![0, 0, 1];

        let metrics = Metrics::from_predictions(&predictions, &ground_truth, 2);
        assert!((metrics.macro_precision - 0.75).abs() < 1e-9);
        assert!((metrics.macro_recall - 0.75).abs() < 1e-9);
        // weighted recall equals accuracy
        assert!((metrics.weighted_recall - metrics.accuracy).abs() < 1e-9);
    }

    #[test]
    fn test_classification_report_layout() {
        let names = vec!["cataract".to_string(), "normal".to_string()];
        let metrics = Metrics::from_predictions(&[0, 1, 1, 1], &[0, 1, 0, 1], 2)
            .with_class_names(&names);

        let report = metrics.classification_report();
        assert!(report.contains("precision"));
        assert!(report.contains("cataract"));
        assert!(report.contains("macro avg"));
        assert!(report.contains("weighted avg"));
        assert!(report.lines().any(|l| l.trim_start().starts_with("accuracy")));
    }

    #[test]
    fn test_save_csv_uses_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 0], 2);
        cm.save_csv(&path, &["a".to_string(), "b".to_string()]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "actual\\predicted,a,b\na,1,1\nb,0,0\n");
    }

    #[test]
    fn test_weighted_average() {
        let mut avg = WeightedAverage::new();
        avg.add(1.0, 3);
        avg.add(2.0, 1);
        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_tracker() {
        let mut tracker = AccuracyTracker::new();
        tracker.add_batch(&[0, 1, 2], &[0, 1, 0]);
        assert_eq!(tracker.count(), 3);
        assert!((tracker.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }
}
