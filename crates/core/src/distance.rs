use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`; a zero vector has similarity 0 to everything.
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => {
                let mut dot = 0f64;
                let mut norm_a = 0f64;
                let mut norm_b = 0f64;
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (*x as f64, *y as f64);
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                let denom = norm_a.sqrt() * norm_b.sqrt();
                if denom == 0.0 {
                    1.0
                } else {
                    1.0 - dot / denom
                }
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = *x as f64 - *y as f64;
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = EvalError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            _ => Err(EvalError::UnknownMetric(value.to_string())),
        }
    }
}

/// Reduces one row of the distance matrix to an anomaly score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Distance to the nearest training sample.
    #[default]
    Min,
    Mean,
    Max,
    Median,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Min => "min",
            Reduction::Mean => "mean",
            Reduction::Max => "max",
            Reduction::Median => "median",
        }
    }

    /// Empty rows reduce to NaN.
    pub fn apply(&self, row: &[f64]) -> f64 {
        if row.is_empty() {
            return f64::NAN;
        }
        match self {
            Reduction::Min => row.iter().copied().fold(f64::INFINITY, f64::min),
            Reduction::Max => row.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reduction::Mean => row.iter().sum::<f64>() / row.len() as f64,
            Reduction::Median => {
                let mut sorted = row.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = EvalError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "min" => Ok(Reduction::Min),
            "mean" => Ok(Reduction::Mean),
            "max" => Ok(Reduction::Max),
            "median" => Ok(Reduction::Median),
            _ => Err(EvalError::UnknownReduction(value.to_string())),
        }
    }
}

/// Dense row-major (test × train) distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(EvalError::InvalidInput(
                "distance rows must have equal length".to_string(),
            ));
        }
        let n_rows = rows.len();
        Ok(Self {
            rows: n_rows,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn reduce_rows(&self, reduction: Reduction) -> Vec<f64> {
        (0..self.rows).map(|i| reduction.apply(self.row(i))).collect()
    }

    /// Column of the smallest entry in row `i`; the first one wins ties.
    pub fn argmin_row(&self, i: usize) -> Option<usize> {
        self.row(i)
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(j, _)| j)
    }

    /// Mean of every entry in the given rows.
    pub fn mean_of_rows<I: IntoIterator<Item = usize>>(&self, rows: I) -> Option<f64> {
        let mut sum = 0f64;
        let mut count = 0usize;
        for i in rows {
            sum += self.row(i).iter().sum::<f64>();
            count += self.cols;
        }
        (count > 0).then(|| sum / count as f64)
    }
}

/// All-pairs distances between `test` and `train` embeddings.
pub fn pairwise_distance(
    test: &[Vec<f32>],
    train: &[Vec<f32>],
    metric: DistanceMetric,
) -> Result<DistanceMatrix> {
    let dim = test.first().or_else(|| train.first()).map(Vec::len);
    if let Some(dim) = dim {
        if let Some(bad) = test.iter().chain(train).find(|v| v.len() != dim) {
            return Err(EvalError::InvalidInput(format!(
                "embedding dimension mismatch: {} vs {dim}",
                bad.len()
            )));
        }
    }
    let data: Vec<f64> = test
        .par_iter()
        .map(|t| {
            train
                .iter()
                .map(|r| metric.distance(t, r))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();
    Ok(DistanceMatrix {
        rows: test.len(),
        cols: train.len(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn parses_metrics_and_reductions() {
        assert_eq!("Cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert!(matches!(
            "manhattan".parse::<DistanceMetric>(),
            Err(EvalError::UnknownMetric(_))
        ));
        assert_eq!("median".parse::<Reduction>().unwrap(), Reduction::Median);
        assert!(matches!(
            "p95".parse::<Reduction>(),
            Err(EvalError::UnknownReduction(_))
        ));
    }

    #[test]
    fn cosine_distance_matches_definition() {
        let m = DistanceMetric::Cosine;
        assert!(close(m.distance(&[1.0, 0.0], &[1.0, 0.0]), 0.0));
        assert!(close(m.distance(&[1.0, 0.0], &[0.0, 1.0]), 1.0));
        assert!(close(m.distance(&[1.0, 0.0], &[-1.0, 0.0]), 2.0));
        assert!(close(m.distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0));
    }

    #[test]
    fn euclidean_distance_matches_definition() {
        assert!(close(
            DistanceMetric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]),
            5.0
        ));
    }

    #[test]
    fn matrix_shape_follows_test_by_train() {
        let test = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        let train = vec![vec![0.0, 0.0], vec![3.0, 4.0]];
        let matrix = pairwise_distance(&test, &train, DistanceMetric::Euclidean).unwrap();
        assert_eq!(matrix.shape(), (3, 2));
        assert!(close(matrix.get(0, 1), 5.0));
        assert_eq!(matrix.reduce_rows(Reduction::Min).len(), 3);
        assert_eq!(matrix.argmin_row(0), Some(0));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = pairwise_distance(&[vec![0.0]], &[vec![0.0, 1.0]], DistanceMetric::Cosine)
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidInput(_)));
    }

    #[test]
    fn reductions_cover_row() {
        let row = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(Reduction::Min.apply(&row), 1.0);
        assert_eq!(Reduction::Max.apply(&row), 4.0);
        assert_eq!(Reduction::Mean.apply(&row), 2.5);
        assert_eq!(Reduction::Median.apply(&row), 2.5);
        assert!(Reduction::Min.apply(&[]).is_nan());
    }

    #[test]
    fn mean_of_rows_averages_every_entry() {
        let matrix = DistanceMatrix::from_rows(vec![vec![1.0, 3.0], vec![5.0, 7.0], vec![9.0, 9.0]])
            .unwrap();
        assert_eq!(matrix.mean_of_rows([0, 1]), Some(4.0));
        assert_eq!(matrix.mean_of_rows(Vec::new()), None);
    }
}
