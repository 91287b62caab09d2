//! Cross-method comparison of stored results.

use std::fmt::Write as _;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use tracing::warn;

use crate::error::{EvalError, Result};
use crate::metrics::TestResult;
use crate::store::ResultStore;

/// AUC per case (rows) and method (columns).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AucTable {
    pub methods: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl AucTable {
    pub fn get(&self, case_no: usize, method: &str) -> Option<f64> {
        let col = self.methods.iter().position(|m| m == method)?;
        self.rows.get(case_no)?.get(col).copied().flatten()
    }

    pub fn method_mean(&self, method: &str) -> Option<f64> {
        let col = self.methods.iter().position(|m| m == method)?;
        let values: Vec<f64> = self.rows.iter().filter_map(|row| row[col]).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Non-good class mean distances, divided by the method's divisor.
    pub normalized_anomaly: IndexMap<String, Vec<f64>>,
    /// Good class mean distances, divided by the method's divisor.
    pub normalized_normal: IndexMap<String, Vec<f64>>,
    /// Mean of the method's good class distances over all cases.
    pub divisors: IndexMap<String, f64>,
    pub aucs: AucTable,
}

/// Normalizes distances per method and tabulates AUCs over cases.
///
/// Each case contributes the first filled sub-case of each method.
pub fn summarize(store: &ResultStore<TestResult>) -> Result<Summary> {
    let n_cases = store.shape().len();
    let mut summary = Summary {
        aucs: AucTable {
            methods: store.methods().map(str::to_string).collect(),
            rows: vec![vec![None; store.methods().count()]; n_cases],
        },
        ..Default::default()
    };
    for (col, (method, table)) in store.tables().enumerate() {
        let mut normal = Vec::new();
        let mut anomaly = Vec::new();
        for case_no in 0..n_cases {
            let Some((_, result)) = table.first_filled(case_no) else {
                warn!(method, case_no, "no stored result for case");
                continue;
            };
            normal.extend(result.distances.good());
            anomaly.extend(result.distances.anomalies().map(|(_, d)| d));
            summary.aucs.rows[case_no][col] = Some(result.auc());
        }
        if normal.is_empty() {
            return Err(EvalError::InvalidInput(format!(
                "method {method:?} has no good class distances to normalize by"
            )));
        }
        let divisor = normal.iter().sum::<f64>() / normal.len() as f64;
        if divisor == 0.0 || !divisor.is_finite() {
            return Err(EvalError::InvalidInput(format!(
                "method {method:?} has degenerate normalization divisor {divisor}"
            )));
        }
        summary.normalized_normal.insert(
            method.to_string(),
            normal.iter().map(|d| d / divisor).collect(),
        );
        summary.normalized_anomaly.insert(
            method.to_string(),
            anomaly.iter().map(|d| d / divisor).collect(),
        );
        summary.divisors.insert(method.to_string(), divisor);
    }
    Ok(summary)
}

impl Summary {
    /// Plain-text rendering: AUC per case, then normalized distance means.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let methods = &self.aucs.methods;
        let _ = writeln!(out, "# Stat: AUC");
        let _ = writeln!(
            out,
            "{:>6}  {}",
            "case",
            methods.iter().map(|m| format!("{m:>12}")).join("  ")
        );
        for (case_no, row) in self.aucs.rows.iter().enumerate() {
            let cells = row
                .iter()
                .map(|cell| match cell {
                    Some(auc) => format!("{auc:>12.4}"),
                    None => format!("{:>12}", "-"),
                })
                .join("  ");
            let _ = writeln!(out, "{case_no:>6}  {cells}");
        }
        let means = methods
            .iter()
            .map(|m| match self.aucs.method_mean(m) {
                Some(mean) => format!("{mean:>12.4}"),
                None => format!("{:>12}", "-"),
            })
            .join("  ");
        let _ = writeln!(out, "{:>6}  {means}", "mean");

        let _ = writeln!(out, "\n# Stat: Normalized distances");
        for method in methods {
            let anomaly = mean_of(self.normalized_anomaly.get(method));
            let normal = mean_of(self.normalized_normal.get(method));
            let divisor = self.divisors.get(method).copied().unwrap_or(f64::NAN);
            let _ = writeln!(
                out,
                "{method}: anomaly={anomaly:.4} normal={normal:.4} divisor={divisor:.6}"
            );
        }
        out
    }
}

fn mean_of(values: Option<&Vec<f64>>) -> f64 {
    match values {
        Some(values) if !values.is_empty() => values.iter().sum::<f64>() / values.len() as f64,
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ClassDistanceTable, RocCurve};

    fn result(good: f64, defects: &[(&str, f64)], auc: f64) -> TestResult {
        let mut rows = IndexMap::new();
        rows.insert("good".to_string(), good);
        for (class, d) in defects {
            rows.insert(class.to_string(), *d);
        }
        TestResult {
            distances: ClassDistanceTable {
                title: "case".to_string(),
                rows,
            },
            roc: RocCurve {
                auc,
                ..Default::default()
            },
            worst: Vec::new(),
        }
    }

    #[test]
    fn divisor_is_mean_of_good_distances() {
        let mut store = ResultStore::new(vec![2, 2]);
        store
            .store("m", result(0.2, &[("a", 0.4), ("b", 0.8)], 0.9), 0, 0)
            .unwrap();
        store
            .store("m", result(0.6, &[("c", 1.2)], 0.7), 1, 0)
            .unwrap();
        let summary = summarize(&store).unwrap();
        let divisor = summary.divisors["m"];
        assert!((divisor - 0.4).abs() < 1e-12);
        let normal = &summary.normalized_normal["m"];
        assert!((normal[0] - 0.5).abs() < 1e-12);
        assert!((normal[1] - 1.5).abs() < 1e-12);
        let anomaly = &summary.normalized_anomaly["m"];
        assert_eq!(anomaly.len(), 3);
        assert!((anomaly[2] - 3.0).abs() < 1e-12);
        assert_eq!(summary.aucs.get(0, "m"), Some(0.9));
        assert_eq!(summary.aucs.get(1, "m"), Some(0.7));
    }

    #[test]
    fn missing_cases_leave_auc_cells_empty() {
        let mut store = ResultStore::new(vec![1, 1]);
        store.store("m", result(0.5, &[("a", 1.0)], 0.8), 0, 0).unwrap();
        let summary = summarize(&store).unwrap();
        assert_eq!(summary.aucs.get(1, "m"), None);
        assert_eq!(summary.aucs.method_mean("m"), Some(0.8));
        assert!(summary.render().contains("# Stat: AUC"));
    }

    #[test]
    fn zero_divisor_is_rejected() {
        let mut store = ResultStore::new(vec![1]);
        store.store("m", result(0.0, &[("a", 1.0)], 0.8), 0, 0).unwrap();
        assert!(summarize(&store).is_err());
    }
}
