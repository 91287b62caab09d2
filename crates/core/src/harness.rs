use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::dataset::{FolderDataset, SubsetSize};
use crate::distance::{pairwise_distance, DistanceMetric, Reduction};
use crate::embedding::{embed, FeatureModel, DEFAULT_BATCH_SIZE};
use crate::error::Result;
use crate::layout::{self, DatasetLayout, Materialize};
use crate::metrics::{ClassExtremes, Scoring, TestResult};
use crate::protocol::{PlanOptions, Protocol, TrainingPlan};
use crate::store::ResultStore;
use crate::summary::{summarize, Summary};

pub const NO_TEST_TITLE: &str = "(no test)";

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub root: PathBuf,
    pub protocol: Protocol,
    pub distance: DistanceMetric,
    /// Number of worst/best samples to report.
    pub n_mosts: usize,
    pub train_valid_pct: f64,
    pub test_size: SubsetSize,
    pub img_size: u32,
    pub reduction: Reduction,
    pub skip_data_creation: bool,
    pub materialize: Materialize,
    pub batch_size: usize,
    pub seed: u64,
    /// Class whose extremes are reported per test; `None` reports every defect class.
    pub inspect_class: Option<String>,
}

impl BenchmarkConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            protocol: Protocol::Artificial,
            distance: DistanceMetric::Cosine,
            n_mosts: 5,
            train_valid_pct: 0.2,
            test_size: SubsetSize::All,
            img_size: 224,
            reduction: Reduction::Min,
            skip_data_creation: false,
            materialize: Materialize::Copy,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: 42,
            inspect_class: None,
        }
    }
}

/// Produces a feature model from a training plan.
pub trait Trainer {
    type Model: FeatureModel;

    fn train(&mut self, plan: &TrainingPlan) -> Result<Self::Model>;
}

impl<F, M> Trainer for F
where
    F: FnMut(&TrainingPlan) -> Result<M>,
    M: FeatureModel,
{
    type Model = M;

    fn train(&mut self, plan: &TrainingPlan) -> Result<M> {
        self(plan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    pub case_no: usize,
    pub sub_no: usize,
}

/// Everything one test produced; `result` is what gets stored.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub selection: TestSelection,
    pub title: String,
    pub shape: (usize, usize),
    pub result: TestResult,
    pub extremes: Vec<ClassExtremes>,
}

/// Runs anomaly-detection tests over every case of a benchmark dataset.
pub struct Benchmark {
    config: BenchmarkConfig,
    layout: DatasetLayout,
    current: Option<TestSelection>,
    results: ResultStore<TestResult>,
}

impl Benchmark {
    /// Discovers cases, then builds test instance folders unless `skip_data_creation` is set.
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.protocol.ensure_implemented()?;
        let layout = DatasetLayout::discover(&config.root)?;
        info!(
            root = %config.root.display(),
            cases = layout.n_cases(),
            protocol = %config.protocol,
            "discovered benchmark cases"
        );
        let results = ResultStore::new(layout.shape());
        let bench = Self {
            config,
            layout,
            current: None,
            results,
        };
        bench.create_test_data()?;
        Ok(bench)
    }

    fn create_test_data(&self) -> Result<()> {
        if self.config.skip_data_creation {
            debug!("skipping test data creation");
            return Ok(());
        }
        layout::build(
            self.config.protocol,
            self.layout.cases(),
            &self.config.root,
            layout::BuildOptions {
                materialize: self.config.materialize,
                skip_data_creation: false,
            },
        )?;
        Ok(())
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn n_cases(&self) -> usize {
        self.layout.n_cases()
    }

    pub fn n_subs(&self, case_no: usize) -> usize {
        self.layout.n_subs(case_no)
    }

    pub fn case(&self, case_no: usize) -> Option<&str> {
        self.layout.case(case_no)
    }

    pub fn sub(&self, case_no: usize, sub_no: usize) -> Option<&str> {
        self.layout.sub(case_no, sub_no)
    }

    pub fn sub_tests(&self, case_no: usize, sub_no: usize) -> Vec<&str> {
        self.layout.sub_tests(case_no, sub_no)
    }

    pub fn subcase(&self, case_no: usize, sub_no: usize) -> Result<String> {
        self.layout.instance_name(case_no, sub_no)
    }

    pub fn case_folder(&self, case_no: usize, sub_no: usize) -> Result<PathBuf> {
        self.layout.instance_folder(case_no, sub_no)
    }

    pub fn set_test(&mut self, case_no: usize, sub_no: usize) -> Result<()> {
        self.layout.check(case_no, sub_no)?;
        self.current = Some(TestSelection { case_no, sub_no });
        Ok(())
    }

    pub fn current(&self) -> Option<TestSelection> {
        self.current
    }

    fn selection(&self) -> Option<TestSelection> {
        if self.current.is_none() {
            error!("no test selected, call set_test first");
        }
        self.current
    }

    fn test_path(&self, selection: TestSelection) -> Result<PathBuf> {
        self.case_folder(selection.case_no, selection.sub_no)
    }

    /// Training data of the selected test, or `None` before `set_test`.
    pub fn training_plan(&self) -> Result<Option<TrainingPlan>> {
        let Some(selection) = self.selection() else {
            return Ok(None);
        };
        let plan = self.config.protocol.training_plan(
            &self.test_path(selection)?,
            &PlanOptions {
                valid_pct: self.config.train_valid_pct,
                img_size: self.config.img_size,
                seed: self.config.seed,
            },
        )?;
        Ok(Some(plan))
    }

    pub fn test_title(&self) -> Result<String> {
        let Some(selection) = self.selection() else {
            return Ok(NO_TEST_TITLE.to_string());
        };
        let case = self.case(selection.case_no).unwrap_or_default();
        self.config.protocol.title(case)
    }

    pub fn clean_all_test_data(&self) -> Result<Vec<PathBuf>> {
        layout::clean_generated(&self.config.root)
    }

    /// Loads `sub_folder` of the selected test (or an absolute folder) for evaluation.
    pub fn eval_dataset(&self, sub_folder: &Path) -> Result<Option<FolderDataset>> {
        let Some(selection) = self.selection() else {
            return Ok(None);
        };
        let folder = self.test_path(selection)?.join(sub_folder);
        FolderDataset::open(&folder, self.config.test_size, self.config.seed).map(Some)
    }

    pub fn store_results(
        &mut self,
        name: &str,
        result: TestResult,
        case_no: usize,
        sub_no: usize,
    ) -> Result<()> {
        self.results.store(name, result, case_no, sub_no)
    }

    pub fn results(&self) -> &ResultStore<TestResult> {
        &self.results
    }

    /// Trains on the selected test instance, scores its test set and stores the result.
    ///
    /// Returns `None` when no test has been selected.
    pub fn test<T: Trainer>(&mut self, name: &str, trainer: &mut T) -> Result<Option<TestReport>> {
        let Some(selection) = self.selection() else {
            return Ok(None);
        };
        let Some(plan) = self.training_plan()? else {
            return Ok(None);
        };
        let started = Instant::now();
        let model = trainer.train(&plan)?;

        info!(
            test = %self.subcase(selection.case_no, selection.sub_no)?,
            "calculating embeddings for test and train samples"
        );
        let Some(test_ds) = self.eval_dataset(Path::new("test"))? else {
            return Ok(None);
        };
        let Some(train_ds) = self.eval_dataset(plan.reference_dir())? else {
            return Ok(None);
        };
        let test_embs = embed(&model, &test_ds, self.config.batch_size)?;
        let train_embs = embed(&model, &train_ds, self.config.batch_size)?;

        let distances =
            pairwise_distance(&test_embs.vectors, &train_embs.vectors, self.config.distance)?;
        info!(shape = ?distances.shape(), "calculated distances (test x train)");

        let title = self.test_title()?;
        let good_index = test_ds.good_index()?;
        let scoring = Scoring::new(
            &distances,
            &test_ds,
            &train_ds,
            &test_embs.labels,
            good_index,
            self.config.reduction,
        )?;
        let result = scoring.into_result(&title, self.config.n_mosts)?;
        let extremes = self.inspect(&scoring, &test_ds, good_index)?;

        self.store_results(name, result.clone(), selection.case_no, selection.sub_no)?;
        info!(
            method = name,
            title = %title,
            auc = result.auc(),
            elapsed = ?started.elapsed(),
            "test finished"
        );
        Ok(Some(TestReport {
            selection,
            title,
            shape: distances.shape(),
            result,
            extremes,
        }))
    }

    fn inspect(
        &self,
        scoring: &Scoring<'_>,
        test_ds: &FolderDataset,
        good_index: usize,
    ) -> Result<Vec<ClassExtremes>> {
        let k = self.config.n_mosts;
        match &self.config.inspect_class {
            None => Ok((0..test_ds.classes().len())
                .filter(|&class| class != good_index)
                .map(|class| scoring.class_extremes(class, k))
                .collect()),
            Some(name) => Ok(vec![scoring.class_extremes(test_ds.class_index(name)?, k)]),
        }
    }

    /// Tests the first sub-case of every case under `name`.
    pub fn do_tests<T: Trainer>(
        &mut self,
        name: &str,
        trainer: &mut T,
        delete_models: bool,
    ) -> Result<Vec<TestReport>> {
        let mut reports = Vec::new();
        for case_no in 0..self.n_cases() {
            if self.n_subs(case_no) == 0 {
                info!(method = name, case_no, "case has no sub-cases, skipping");
                continue;
            }
            info!(method = name, case_no, "testing case");
            self.set_test(case_no, 0)?;
            if let Some(report) = self.test(name, trainer)? {
                reports.push(report);
            }
        }
        if delete_models {
            layout::purge_models(&self.config.root)?;
        }
        Ok(reports)
    }

    /// Summary over all stored methods, or only `names` in that order.
    pub fn summary<S: AsRef<str>>(&self, names: Option<&[S]>) -> Result<Summary> {
        match names {
            Some(names) => summarize(&self.results.subset(names)?),
            None => summarize(&self.results),
        }
    }
}
