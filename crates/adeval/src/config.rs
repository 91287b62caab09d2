use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use adeval_core::{BenchmarkConfig, Materialize, SubsetSize, DEFAULT_BATCH_SIZE};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_OUTPUT: &str = "adeval-out";
pub const DEFAULT_SEED: u64 = 42;

/// One method to evaluate: a name and the embeddings its model produced.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodConfig {
    pub name: String,
    /// JSONL of `{sample, label, embedding}` keyed by path relative to the dataset root.
    pub embeddings: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub dataset_root: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_distance")]
    pub distance: String,
    #[serde(default = "default_reduction")]
    pub reduction: String,
    #[serde(default = "default_n_mosts")]
    pub n_mosts: usize,
    #[serde(default = "default_train_valid_pct")]
    pub train_valid_pct: f64,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_img_size")]
    pub img_size: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub skip_data_creation: bool,
    #[serde(default)]
    pub materialize: Materialize,
    #[serde(default)]
    pub inspect_class: Option<String>,
    #[serde(default)]
    pub delete_models: bool,
    pub methods: Vec<MethodConfig>,
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}

fn default_protocol() -> String {
    "artificial".to_string()
}

fn default_distance() -> String {
    "cosine".to_string()
}

fn default_reduction() -> String {
    "min".to_string()
}

fn default_n_mosts() -> usize {
    5
}

fn default_train_valid_pct() -> f64 {
    0.2
}

fn default_test_size() -> f64 {
    1.0
}

fn default_img_size() -> u32 {
    224
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl RunConfig {
    /// Reads YAML, or TOML when the file ends in `.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if is_toml {
            toml::from_str(&raw).map_err(|e| anyhow!("invalid adeval config: {e}"))
        } else {
            serde_yaml::from_str(&raw).context("invalid adeval config")
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = env::var("ADEVAL_SEED") {
            self.seed = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid ADEVAL_SEED {raw:?}"))?;
        }
        Ok(())
    }

    pub fn benchmark_config(&self) -> Result<BenchmarkConfig> {
        Ok(BenchmarkConfig {
            root: self.dataset_root.clone(),
            protocol: self.protocol.parse()?,
            distance: self.distance.parse()?,
            n_mosts: self.n_mosts,
            train_valid_pct: self.train_valid_pct,
            test_size: SubsetSize::from_value(self.test_size)?,
            img_size: self.img_size,
            reduction: self.reduction.parse()?,
            skip_data_creation: self.skip_data_creation,
            materialize: self.materialize,
            batch_size: self.batch_size,
            seed: self.seed,
            inspect_class: self.inspect_class.clone(),
        })
    }
}
