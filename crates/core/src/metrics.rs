//! Anomaly scoring of a test set against a reference set of normal samples.
//!
//! Scores are reduced rows of the distance matrix; a larger score means a
//! sample looks less like any reference sample.

use std::cmp::Ordering;

use adeval_records::{ClassDistanceRecord, MatchRecord, ResultRecord};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dataset::{FolderDataset, GOOD_CLASS};
use crate::distance::{DistanceMatrix, Reduction};
use crate::error::{EvalError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Score threshold of each point; the first point sits one above the highest score.
    pub thresholds: Vec<f64>,
    pub auc: f64,
}

/// ROC curve of `scores` against binary ground truth (`true` = anomaly).
///
/// Points run from (0, 0) to (1, 1), one per distinct score in descending order.
pub fn roc_curve(scores: &[f64], truth: &[bool]) -> Result<RocCurve> {
    if scores.len() != truth.len() {
        return Err(EvalError::InvalidInput(format!(
            "scores length {} != labels length {}",
            scores.len(),
            truth.len()
        )));
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err(EvalError::InvalidInput("scores contain NaN".to_string()));
    }
    let positives = truth.iter().filter(|&&t| t).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EvalError::InvalidInput(format!(
            "roc needs both classes, got {positives} anomalous and {negatives} normal samples"
        )));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let top = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut thresholds = vec![top + 1.0];
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < order.len() {
        let current = scores[order[i]];
        while i < order.len() && scores[order[i]] == current {
            if truth[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        fpr.push(fp as f64 / negatives as f64);
        tpr.push(tp as f64 / positives as f64);
        thresholds.push(current);
    }
    let auc = auc(&fpr, &tpr);
    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
        auc,
    })
}

/// Trapezoidal area under a curve given by `x`, `y`.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]).abs() * (ys[0] + ys[1]) / 2.0)
        .sum()
}

/// `true` for every label other than `good_index`.
pub fn anomaly_truth(labels: &[usize], good_index: usize) -> Vec<bool> {
    labels.iter().map(|&y| y != good_index).collect()
}

/// Mean distance of each test class to the whole reference set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDistanceTable {
    pub title: String,
    pub rows: IndexMap<String, f64>,
}

impl ClassDistanceTable {
    pub fn get(&self, class: &str) -> Option<f64> {
        self.rows.get(class).copied()
    }

    pub fn good(&self) -> Option<f64> {
        self.get(GOOD_CLASS)
    }

    pub fn anomalies(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rows
            .iter()
            .filter(|(class, _)| class.as_str() != GOOD_CLASS)
            .map(|(class, d)| (class.as_str(), *d))
    }
}

pub fn mean_class_distances(
    distances: &DistanceMatrix,
    labels: &[usize],
    classes: &[String],
    title: &str,
) -> ClassDistanceTable {
    let mut rows = IndexMap::new();
    for (class_idx, class) in classes.iter().enumerate() {
        let members = labels
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class_idx)
            .map(|(i, _)| i);
        if let Some(mean) = distances.mean_of_rows(members) {
            rows.insert(class.clone(), mean);
        }
    }
    ClassDistanceTable {
        title: title.to_string(),
        rows,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    /// Lowest scores first.
    Worst,
    /// Highest scores first.
    Best,
}

/// Picks `min(k, candidates.len())` candidates by score; ties keep candidate order.
pub fn select_extremes(scores: &[f64], candidates: &[usize], k: usize, extreme: Extreme) -> Vec<usize> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|&a, &b| {
        let ord = scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal);
        match extreme {
            Extreme::Worst => ord,
            Extreme::Best => ord.reverse(),
        }
    });
    ranked.truncate(k);
    ranked
}

/// A test sample paired with its nearest reference sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub test_idx: usize,
    pub test_sample: String,
    pub test_label: String,
    pub distance: f64,
    pub train_idx: usize,
    pub train_sample: String,
    pub train_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassExtremes {
    pub class: String,
    pub best: Vec<MatchInfo>,
    pub worst: Vec<MatchInfo>,
}

/// Result of one test instance for one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub distances: ClassDistanceTable,
    pub roc: RocCurve,
    pub worst: Vec<MatchInfo>,
}

impl TestResult {
    pub fn auc(&self) -> f64 {
        self.roc.auc
    }

    pub fn to_record(
        &self,
        method: &str,
        case_no: usize,
        sub_no: usize,
        case: &str,
        sub: &str,
    ) -> ResultRecord {
        ResultRecord {
            method: method.to_string(),
            case_no,
            sub_no,
            case: case.to_string(),
            sub: sub.to_string(),
            title: self.distances.title.clone(),
            auc: self.roc.auc,
            fpr: self.roc.fpr.clone(),
            tpr: self.roc.tpr.clone(),
            thresholds: self.roc.thresholds.clone(),
            class_distances: self
                .distances
                .rows
                .iter()
                .map(|(class, distance)| ClassDistanceRecord {
                    class: class.clone(),
                    distance: *distance,
                })
                .collect(),
            worst: self
                .worst
                .iter()
                .map(|m| MatchRecord {
                    test_idx: m.test_idx,
                    test_sample: m.test_sample.clone(),
                    test_label: m.test_label.clone(),
                    distance: m.distance,
                    train_idx: m.train_idx,
                    train_sample: m.train_sample.clone(),
                    train_label: m.train_label.clone(),
                })
                .collect(),
        }
    }

    pub fn from_record(record: &ResultRecord) -> Self {
        Self {
            distances: ClassDistanceTable {
                title: record.title.clone(),
                rows: record
                    .class_distances
                    .iter()
                    .map(|row| (row.class.clone(), row.distance))
                    .collect(),
            },
            roc: RocCurve {
                fpr: record.fpr.clone(),
                tpr: record.tpr.clone(),
                thresholds: record.thresholds.clone(),
                auc: record.auc,
            },
            worst: record
                .worst
                .iter()
                .map(|m| MatchInfo {
                    test_idx: m.test_idx,
                    test_sample: m.test_sample.clone(),
                    test_label: m.test_label.clone(),
                    distance: m.distance,
                    train_idx: m.train_idx,
                    train_sample: m.train_sample.clone(),
                    train_label: m.train_label.clone(),
                })
                .collect(),
        }
    }
}

/// Scores of a test set against a reference set, ready for aggregation.
pub struct Scoring<'a> {
    distances: &'a DistanceMatrix,
    test: &'a FolderDataset,
    train: &'a FolderDataset,
    labels: &'a [usize],
    good_index: usize,
    scores: Vec<f64>,
}

impl<'a> Scoring<'a> {
    pub fn new(
        distances: &'a DistanceMatrix,
        test: &'a FolderDataset,
        train: &'a FolderDataset,
        labels: &'a [usize],
        good_index: usize,
        reduction: Reduction,
    ) -> Result<Self> {
        let (rows, cols) = distances.shape();
        if rows != labels.len() || rows != test.len() {
            return Err(EvalError::InvalidInput(format!(
                "distance matrix has {rows} rows for {} labels and {} test samples",
                labels.len(),
                test.len()
            )));
        }
        if cols != train.len() {
            return Err(EvalError::InvalidInput(format!(
                "distance matrix has {cols} columns for {} reference samples",
                train.len()
            )));
        }
        if cols == 0 {
            return Err(EvalError::InvalidInput(
                "reference set is empty".to_string(),
            ));
        }
        Ok(Self {
            distances,
            test,
            train,
            labels,
            good_index,
            scores: distances.reduce_rows(reduction),
        })
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn truth(&self) -> Vec<bool> {
        anomaly_truth(self.labels, self.good_index)
    }

    pub fn roc(&self) -> Result<RocCurve> {
        roc_curve(&self.scores, &self.truth())
    }

    pub fn class_distances(&self, title: &str) -> ClassDistanceTable {
        mean_class_distances(self.distances, self.labels, self.test.classes(), title)
    }

    /// The `k` anomalous samples that look most normal.
    pub fn worst_anomalies(&self, k: usize) -> Vec<MatchInfo> {
        let anomalous: Vec<usize> = self
            .labels
            .iter()
            .enumerate()
            .filter(|(_, &y)| y != self.good_index)
            .map(|(i, _)| i)
            .collect();
        let picked = select_extremes(&self.scores, &anomalous, k, Extreme::Worst);
        self.match_info(&picked)
    }

    /// Best and worst `k` samples of one class. For the normal class a high
    /// score is the failure, so best and worst trade places.
    pub fn class_extremes(&self, class: usize, k: usize) -> ClassExtremes {
        let members: Vec<usize> = self
            .labels
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();
        let mut worst = self.match_info(&select_extremes(&self.scores, &members, k, Extreme::Worst));
        let mut best = self.match_info(&select_extremes(&self.scores, &members, k, Extreme::Best));
        if class == self.good_index {
            std::mem::swap(&mut worst, &mut best);
        }
        ClassExtremes {
            class: self.test.classes().get(class).cloned().unwrap_or_default(),
            best,
            worst,
        }
    }

    pub fn match_info(&self, test_rows: &[usize]) -> Vec<MatchInfo> {
        test_rows
            .iter()
            .filter_map(|&test_idx| {
                let train_idx = self.distances.argmin_row(test_idx)?;
                Some(MatchInfo {
                    test_idx,
                    test_sample: self.test.sample_name(test_idx),
                    test_label: self.test.label_name(test_idx).to_string(),
                    distance: self.distances.get(test_idx, train_idx),
                    train_idx,
                    train_sample: self.train.sample_name(train_idx),
                    train_label: self.train.label_name(train_idx).to_string(),
                })
            })
            .collect()
    }

    pub fn into_result(&self, title: &str, k: usize) -> Result<TestResult> {
        Ok(TestResult {
            distances: self.class_distances(title),
            roc: self.roc()?,
            worst: self.worst_anomalies(k),
        })
    }
}

/// Per-class distance table, ROC/AUC and worst-`k` anomalies in one call.
#[allow(clippy::too_many_arguments)]
pub fn score(
    distances: &DistanceMatrix,
    test: &FolderDataset,
    train: &FolderDataset,
    labels: &[usize],
    good_index: usize,
    reduction: Reduction,
    k: usize,
    title: &str,
) -> Result<TestResult> {
    Scoring::new(distances, test, train, labels, good_index, reduction)?.into_result(title, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;
    use std::path::PathBuf;

    fn dataset(root: &str, classes: &[&str], labels: &[usize]) -> FolderDataset {
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        let samples = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| Sample {
                path: PathBuf::from(format!("{root}/{}/{i:03}.png", classes[label])),
                label,
            })
            .collect();
        FolderDataset::from_parts(PathBuf::from(root), classes, samples).unwrap()
    }

    #[test]
    fn perfect_separation_has_unit_auc() {
        let roc = roc_curve(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]).unwrap();
        assert_eq!(roc.auc, 1.0);
        assert_eq!(roc.fpr.first(), Some(&0.0));
        assert_eq!(roc.tpr.last(), Some(&1.0));
        assert!((roc.thresholds[0] - 1.9).abs() < 1e-12);
        assert_eq!(roc.thresholds.len(), 5);
    }

    #[test]
    fn inverted_scores_have_zero_auc() {
        let roc = roc_curve(&[0.9, 0.8, 0.2, 0.1], &[false, false, true, true]).unwrap();
        assert_eq!(roc.auc, 0.0);
    }

    #[test]
    fn tied_scores_count_half() {
        let roc = roc_curve(&[0.5, 0.5], &[false, true]).unwrap();
        assert!((roc.auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn roc_requires_both_classes() {
        assert!(roc_curve(&[0.1, 0.2], &[true, true]).is_err());
        assert!(roc_curve(&[0.1], &[true, false]).is_err());
    }

    #[test]
    fn worst_extremes_sort_ascending_and_clamp() {
        let scores = [0.5, 0.1, 0.9, 0.3];
        assert_eq!(select_extremes(&scores, &[0, 1, 2, 3], 2, Extreme::Worst), vec![1, 3]);
        assert_eq!(select_extremes(&scores, &[0, 2], 5, Extreme::Worst), vec![0, 2]);
        assert_eq!(select_extremes(&scores, &[0, 1, 2, 3], 1, Extreme::Best), vec![2]);
    }

    #[test]
    fn scoring_builds_full_result() {
        // classes: crack=0, good=1
        let test = dataset("t", &["crack", "good"], &[1, 1, 0, 0]);
        let train = dataset("r", &["good"], &[0, 0]);
        let distances = DistanceMatrix::from_rows(vec![
            vec![0.1, 0.3],
            vec![0.2, 0.2],
            vec![0.6, 0.4],
            vec![0.9, 0.7],
        ])
        .unwrap();
        let labels = test.labels();
        let result = score(&distances, &test, &train, &labels, 1, Reduction::Min, 1, "bottle").unwrap();
        assert_eq!(result.roc.auc, 1.0);
        assert_eq!(result.distances.title, "bottle");
        assert!((result.distances.get("good").unwrap() - 0.2).abs() < 1e-12);
        assert!((result.distances.get("crack").unwrap() - 0.65).abs() < 1e-12);
        assert_eq!(result.worst.len(), 1);
        let worst = &result.worst[0];
        assert_eq!(worst.test_idx, 2);
        assert_eq!(worst.train_idx, 1);
        assert_eq!(worst.test_label, "crack");
        assert_eq!(worst.train_sample, "good/001.png");
        assert!((worst.distance - 0.4).abs() < 1e-12);
    }

    #[test]
    fn good_class_extremes_are_swapped() {
        let test = dataset("t", &["crack", "good"], &[1, 1, 0]);
        let train = dataset("r", &["good"], &[0]);
        let distances =
            DistanceMatrix::from_rows(vec![vec![0.1], vec![0.5], vec![0.9]]).unwrap();
        let labels = test.labels();
        let scoring = Scoring::new(&distances, &test, &train, &labels, 1, Reduction::Min).unwrap();
        let good = scoring.class_extremes(1, 1);
        assert_eq!(good.class, "good");
        assert_eq!(good.worst[0].test_idx, 1);
        assert_eq!(good.best[0].test_idx, 0);
        let crack = scoring.class_extremes(0, 1);
        assert_eq!(crack.worst[0].test_idx, 2);
    }

    #[test]
    fn scoring_rejects_mismatched_shapes() {
        let test = dataset("t", &["good"], &[0, 0]);
        let train = dataset("r", &["good"], &[0]);
        let distances = DistanceMatrix::from_rows(vec![vec![0.1]]).unwrap();
        let labels = test.labels();
        assert!(Scoring::new(&distances, &test, &train, &labels, 0, Reduction::Min).is_err());
    }

    #[test]
    fn record_conversion_preserves_result() {
        let result = TestResult {
            distances: ClassDistanceTable {
                title: "grid".to_string(),
                rows: [("good".to_string(), 0.2), ("bent".to_string(), 0.5)]
                    .into_iter()
                    .collect(),
            },
            roc: RocCurve {
                fpr: vec![0.0, 1.0],
                tpr: vec![0.0, 1.0],
                thresholds: vec![1.1, 0.1],
                auc: 0.5,
            },
            worst: Vec::new(),
        };
        let record = result.to_record("m", 3, 1, "grid", "bent");
        assert_eq!(record.case_no, 3);
        assert_eq!(TestResult::from_record(&record), result);
    }
}
