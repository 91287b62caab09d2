use adeval_records::ResultRecord;
use indexmap::IndexMap;

use crate::error::{EvalError, Result};
use crate::metrics::TestResult;

/// One cell of a result table.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Unset,
    Filled(T),
}

impl<T> Slot<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Filled(value) => Some(value),
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, Slot::Filled(_))
    }
}

/// Results of one method, indexed by `[case][sub-case]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable<T> {
    slots: Vec<Vec<Slot<T>>>,
}

impl<T> ResultTable<T> {
    pub fn unset(shape: &[usize]) -> Self {
        Self {
            slots: shape
                .iter()
                .map(|&subs| (0..subs).map(|_| Slot::Unset).collect())
                .collect(),
        }
    }

    pub fn get(&self, case_no: usize, sub_no: usize) -> Option<&T> {
        self.slots.get(case_no)?.get(sub_no)?.value()
    }

    pub fn slot(&self, case_no: usize, sub_no: usize) -> Option<&Slot<T>> {
        self.slots.get(case_no)?.get(sub_no)
    }

    /// First filled sub-case of a case.
    pub fn first_filled(&self, case_no: usize) -> Option<(usize, &T)> {
        self.slots
            .get(case_no)?
            .iter()
            .enumerate()
            .find_map(|(sub_no, slot)| slot.value().map(|v| (sub_no, v)))
    }

    pub fn filled(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        self.slots.iter().enumerate().flat_map(|(case_no, subs)| {
            subs.iter()
                .enumerate()
                .filter_map(move |(sub_no, slot)| slot.value().map(|v| (case_no, sub_no, v)))
        })
    }

    pub fn filled_count(&self) -> usize {
        self.filled().count()
    }

    pub fn n_cases(&self) -> usize {
        self.slots.len()
    }
}

/// Results keyed by method name, each a table shaped by the benchmark's case layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultStore<T = TestResult> {
    shape: Vec<usize>,
    tables: IndexMap<String, ResultTable<T>>,
}

impl<T> ResultStore<T> {
    /// `shape[case]` is the number of sub-cases of that case.
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape,
            tables: IndexMap::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Writes `result` into its slot, creating an all-unset table on first use of `method`.
    pub fn store(&mut self, method: &str, result: T, case_no: usize, sub_no: usize) -> Result<()> {
        let subs = self.shape.get(case_no).copied().ok_or_else(|| {
            EvalError::InvalidInput(format!(
                "case {case_no} out of range for {} cases",
                self.shape.len()
            ))
        })?;
        if sub_no >= subs {
            return Err(EvalError::InvalidInput(format!(
                "sub-case {sub_no} out of range for case {case_no} with {subs} sub-cases"
            )));
        }
        let shape = &self.shape;
        let table = self
            .tables
            .entry(method.to_string())
            .or_insert_with(|| ResultTable::unset(shape));
        table.slots[case_no][sub_no] = Slot::Filled(result);
        Ok(())
    }

    pub fn get(&self, method: &str, case_no: usize, sub_no: usize) -> Option<&T> {
        self.tables.get(method)?.get(case_no, sub_no)
    }

    pub fn table(&self, method: &str) -> Option<&ResultTable<T>> {
        self.tables.get(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &ResultTable<T>)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn remove(&mut self, method: &str) -> Option<ResultTable<T>> {
        self.tables.shift_remove(method)
    }
}

impl<T: Clone> ResultStore<T> {
    /// Copy of the store restricted to `methods`, in the given order.
    pub fn subset<S: AsRef<str>>(&self, methods: &[S]) -> Result<Self> {
        let mut tables = IndexMap::new();
        for method in methods {
            let name = method.as_ref();
            let table = self.tables.get(name).ok_or_else(|| {
                EvalError::InvalidInput(format!("no results stored for method {name:?}"))
            })?;
            tables.insert(name.to_string(), table.clone());
        }
        Ok(Self {
            shape: self.shape.clone(),
            tables,
        })
    }
}

impl ResultStore<TestResult> {
    /// Rebuilds a store from persisted records; the shape covers the highest indices seen.
    pub fn from_records(records: &[ResultRecord]) -> Result<Self> {
        let mut shape: Vec<usize> = Vec::new();
        for record in records {
            if shape.len() <= record.case_no {
                shape.resize(record.case_no + 1, 0);
            }
            shape[record.case_no] = shape[record.case_no].max(record.sub_no + 1);
        }
        let mut store = Self::new(shape);
        for record in records {
            store.store(
                &record.method,
                TestResult::from_record(record),
                record.case_no,
                record.sub_no,
            )?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_store_creates_fully_unset_table() {
        let mut store: ResultStore<u32> = ResultStore::new(vec![2, 3]);
        store.store("resnet", 7, 1, 2).unwrap();
        let table = store.table("resnet").unwrap();
        assert_eq!(table.n_cases(), 2);
        assert_eq!(table.slot(0, 0), Some(&Slot::Unset));
        assert_eq!(table.slot(0, 1), Some(&Slot::Unset));
        assert_eq!(table.slot(1, 0), Some(&Slot::Unset));
        assert_eq!(table.slot(1, 2), Some(&Slot::Filled(7)));
        assert_eq!(table.slot(0, 2), None);
        assert_eq!(table.filled_count(), 1);
    }

    #[test]
    fn storing_same_keys_overwrites() {
        let mut store: ResultStore<u32> = ResultStore::new(vec![1]);
        store.store("m", 1, 0, 0).unwrap();
        store.store("m", 2, 0, 0).unwrap();
        assert_eq!(store.get("m", 0, 0), Some(&2));
        assert_eq!(store.table("m").unwrap().filled_count(), 1);
    }

    #[test]
    fn out_of_range_slots_are_rejected() {
        let mut store: ResultStore<u32> = ResultStore::new(vec![1, 2]);
        assert!(store.store("m", 1, 2, 0).is_err());
        assert!(store.store("m", 1, 0, 1).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn subset_keeps_requested_order() {
        let mut store: ResultStore<u32> = ResultStore::new(vec![1]);
        store.store("a", 1, 0, 0).unwrap();
        store.store("b", 2, 0, 0).unwrap();
        let subset = store.subset(&["b", "a"]).unwrap();
        assert_eq!(subset.methods().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(store.subset(&["c"]).is_err());
    }

    #[test]
    fn first_filled_skips_unset_subcases() {
        let mut store: ResultStore<u32> = ResultStore::new(vec![3]);
        store.store("m", 9, 0, 2).unwrap();
        assert_eq!(store.table("m").unwrap().first_filled(0), Some((2, &9)));
    }

    #[test]
    fn from_records_rebuilds_shape() {
        let records = vec![
            ResultRecord {
                method: "m".into(),
                case_no: 1,
                sub_no: 2,
                auc: 0.9,
                ..Default::default()
            },
            ResultRecord {
                method: "m".into(),
                case_no: 0,
                sub_no: 0,
                auc: 0.8,
                ..Default::default()
            },
        ];
        let store = ResultStore::from_records(&records).unwrap();
        assert_eq!(store.shape(), &[1, 3]);
        assert_eq!(store.get("m", 1, 2).unwrap().auc(), 0.9);
    }
}
