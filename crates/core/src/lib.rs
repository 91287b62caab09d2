mod dataset;
mod distance;
mod embedding;
mod error;
mod harness;
mod layout;
mod metrics;
mod protocol;
mod store;
mod summary;

pub use dataset::{
    balance_by_oversampling, list_images, FolderDataset, LabeledFile, Sample, SubsetSize,
    GOOD_CLASS, IMAGE_EXTENSIONS,
};
pub use distance::{pairwise_distance, DistanceMatrix, DistanceMetric, Reduction};
pub use embedding::{embed, Embeddings, FeatureModel, PrecomputedEmbeddings, DEFAULT_BATCH_SIZE};
pub use error::{EvalError, Result};
pub use harness::{
    Benchmark, BenchmarkConfig, TestReport, TestSelection, Trainer, NO_TEST_TITLE,
};
pub use layout::{
    build, clean_generated, is_instance_name, purge_models, BuildOptions, DatasetLayout, Materialize,
    INSTANCE_PREFIX, MODELS_DIR, ORIGINAL_DIR,
};
pub use metrics::{
    anomaly_truth, auc, mean_class_distances, roc_curve, score, select_extremes,
    ClassDistanceTable, ClassExtremes, Extreme, MatchInfo, RocCurve, Scoring, TestResult,
};
pub use protocol::{PlanOptions, Protocol, TrainingPlan};
pub use store::{ResultStore, ResultTable, Slot};
pub use summary::{summarize, AucTable, Summary};
