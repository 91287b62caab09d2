use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::dataset::{balance_by_oversampling, list_images, LabeledFile, GOOD_CLASS};
use crate::error::{EvalError, Result};

/// Experimental protocol used to split a benchmark case into train and test data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Train on good samples only; anomalies are synthesized by the trainer.
    Artificial,
    /// Train on good samples plus one defect class, test on every class.
    /// The held-out defect is part of the test set as well.
    LeaveOneOut,
    /// Train on good samples pooled from several cases.
    Mixed,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Artificial => "artificial",
            Protocol::LeaveOneOut => "leave_one_out",
            Protocol::Mixed => "mixed",
        }
    }

    /// Fails for protocols without a working implementation.
    pub fn ensure_implemented(&self) -> Result<()> {
        match self {
            Protocol::Artificial | Protocol::LeaveOneOut => Ok(()),
            Protocol::Mixed => Err(EvalError::NotImplemented("mixed protocol")),
        }
    }

    /// Display title of a test instance: the case name.
    pub fn title(&self, case: &str) -> Result<String> {
        self.ensure_implemented()?;
        Ok(case.to_string())
    }

    /// Describes what the external trainer should learn from for one test instance folder.
    pub fn training_plan(&self, instance: &Path, options: &PlanOptions) -> Result<TrainingPlan> {
        self.ensure_implemented()?;
        let reference_dir = instance.join("train").join(GOOD_CLASS);
        match self {
            Protocol::Artificial => Ok(TrainingPlan::Artificial {
                good_dir: reference_dir.clone(),
                img_size: options.img_size,
                reference_dir,
            }),
            Protocol::LeaveOneOut => {
                let train_dir = instance.join("train");
                let files = list_images(&train_dir)?
                    .into_iter()
                    .filter_map(|path| {
                        let label = path.parent()?.file_name()?.to_string_lossy().into_owned();
                        Some(LabeledFile { path, label })
                    })
                    .collect::<Vec<_>>();
                if files.is_empty() {
                    return Err(EvalError::InvalidInput(format!(
                        "no training images under {}",
                        train_dir.display()
                    )));
                }
                let mut rng = StdRng::seed_from_u64(options.seed);
                let samples = balance_by_oversampling(files, &mut rng);
                Ok(TrainingPlan::Supervised {
                    root: instance.to_path_buf(),
                    samples,
                    valid_pct: options.valid_pct,
                    test_dir: instance.join("test"),
                    img_size: options.img_size,
                    reference_dir,
                })
            }
            Protocol::Mixed => Err(EvalError::NotImplemented("mixed protocol")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = EvalError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "artificial" => Ok(Protocol::Artificial),
            "leave_one_out" | "out_of_folds" => Ok(Protocol::LeaveOneOut),
            "mixed" | "simple_mix" => Ok(Protocol::Mixed),
            _ => Err(EvalError::UnsupportedProtocol(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    pub valid_pct: f64,
    pub img_size: u32,
    pub seed: u64,
}

/// Training data handed to the external trainer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingPlan {
    Artificial {
        good_dir: PathBuf,
        img_size: u32,
        reference_dir: PathBuf,
    },
    Supervised {
        root: PathBuf,
        /// Class-balanced training files; minority classes are oversampled.
        samples: Vec<LabeledFile>,
        valid_pct: f64,
        test_dir: PathBuf,
        img_size: u32,
        reference_dir: PathBuf,
    },
}

impl TrainingPlan {
    /// Folder of normal exemplars whose embeddings form the distance reference set.
    pub fn reference_dir(&self) -> &Path {
        match self {
            TrainingPlan::Artificial { reference_dir, .. }
            | TrainingPlan::Supervised { reference_dir, .. } => reference_dir,
        }
    }

    pub fn img_size(&self) -> u32 {
        match self {
            TrainingPlan::Artificial { img_size, .. } | TrainingPlan::Supervised { img_size, .. } => {
                *img_size
            }
        }
    }
}
