use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use adeval_records::{read_jsonl, EmbeddingRecord};
use tracing::debug;

use crate::dataset::{relative_name, FolderDataset};
use crate::error::{EvalError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// A trained feature extractor. Implementations own image decoding and inference.
pub trait FeatureModel {
    /// Returns one embedding per input path, in input order.
    fn embed_batch(&self, samples: &[&Path]) -> Result<Vec<Vec<f32>>>;
}

impl<M: FeatureModel + ?Sized> FeatureModel for Box<M> {
    fn embed_batch(&self, samples: &[&Path]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(samples)
    }
}

impl<M: FeatureModel + ?Sized> FeatureModel for &M {
    fn embed_batch(&self, samples: &[&Path]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(samples)
    }
}

/// Embeddings of a dataset together with the dataset's labels, in sample order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

impl Embeddings {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }
}

/// Runs `model` over every sample of `dataset` in batches of `batch_size`.
pub fn embed<M: FeatureModel + ?Sized>(
    model: &M,
    dataset: &FolderDataset,
    batch_size: usize,
) -> Result<Embeddings> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(dataset.len());
    for (batch_no, chunk) in dataset.samples().chunks(batch_size).enumerate() {
        let paths: Vec<&Path> = chunk.iter().map(|s| s.path.as_path()).collect();
        let batch = model.embed_batch(&paths)?;
        if batch.len() != paths.len() {
            return Err(EvalError::InvalidInput(format!(
                "feature model returned {} embeddings for a batch of {}",
                batch.len(),
                paths.len()
            )));
        }
        debug!(batch = batch_no, size = batch.len(), "embedded batch");
        vectors.extend(batch);
    }
    if let Some(dim) = vectors.first().map(Vec::len) {
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(EvalError::InvalidInput(format!(
                "embedding {bad} has {} dimensions, expected {dim}",
                vectors[bad].len()
            )));
        }
    }
    Ok(Embeddings {
        vectors,
        labels: dataset.labels(),
    })
}

/// Serves embeddings computed ahead of time by an external model run.
///
/// Records are keyed by sample path relative to `root`.
#[derive(Debug, Clone)]
pub struct PrecomputedEmbeddings {
    root: PathBuf,
    by_sample: HashMap<String, Vec<f32>>,
}

impl PrecomputedEmbeddings {
    pub fn new(root: &Path, records: Vec<EmbeddingRecord>) -> Self {
        let by_sample = records
            .into_iter()
            .map(|record| (normalize_key(&record.sample), record.embedding))
            .collect();
        Self {
            root: root.to_path_buf(),
            by_sample,
        }
    }

    pub fn load(path: &Path, root: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EvalError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("embeddings file {} not found", path.display()),
            )));
        }
        let records: Vec<EmbeddingRecord> = read_jsonl(path)?;
        if records.is_empty() {
            return Err(EvalError::InvalidInput(format!(
                "no embedding records in {}",
                path.display()
            )));
        }
        debug!(records = records.len(), path = %path.display(), "loaded embeddings");
        Ok(Self::new(root, records))
    }

    pub fn len(&self) -> usize {
        self.by_sample.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sample.is_empty()
    }
}

impl FeatureModel for PrecomputedEmbeddings {
    fn embed_batch(&self, samples: &[&Path]) -> Result<Vec<Vec<f32>>> {
        samples
            .iter()
            .map(|path| {
                let key = relative_name(&self.root, path);
                self.by_sample
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| EvalError::MissingEmbedding(path.to_path_buf()))
            })
            .collect()
    }
}

fn normalize_key(sample: &str) -> String {
    sample.replace('\\', "/").trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Sample, SubsetSize};
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    struct CountingModel {
        batches: RefCell<Vec<usize>>,
    }

    impl FeatureModel for CountingModel {
        fn embed_batch(&self, samples: &[&Path]) -> Result<Vec<Vec<f32>>> {
            self.batches.borrow_mut().push(samples.len());
            Ok(samples.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn dataset(n: usize) -> FolderDataset {
        let samples = (0..n)
            .map(|i| Sample {
                path: PathBuf::from(format!("root/good/{i:03}.png")),
                label: 0,
            })
            .collect();
        FolderDataset::from_parts(PathBuf::from("root"), vec!["good".to_string()], samples).unwrap()
    }

    #[test]
    fn embed_feeds_model_in_batches() {
        let model = CountingModel {
            batches: RefCell::new(Vec::new()),
        };
        let embeddings = embed(&model, &dataset(5), 2).unwrap();
        assert_eq!(embeddings.len(), 5);
        assert_eq!(embeddings.labels, vec![0; 5]);
        assert_eq!(*model.batches.borrow(), vec![2, 2, 1]);
    }

    #[test]
    fn embed_rejects_short_batches() {
        struct Lossy;
        impl FeatureModel for Lossy {
            fn embed_batch(&self, _samples: &[&Path]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0]])
            }
        }
        assert!(matches!(
            embed(&Lossy, &dataset(3), 8),
            Err(EvalError::InvalidInput(_))
        ));
    }

    #[test]
    fn precomputed_embeddings_resolve_relative_paths() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("case0-0-bottle-crack/test/good");
        fs::create_dir_all(&good).unwrap();
        fs::write(good.join("000.png"), "x").unwrap();
        let model = PrecomputedEmbeddings::new(
            dir.path(),
            vec![EmbeddingRecord {
                sample: "./case0-0-bottle-crack/test/good/000.png".to_string(),
                label: None,
                embedding: vec![0.5, 0.5],
            }],
        );
        let ds = FolderDataset::open(
            &dir.path().join("case0-0-bottle-crack/test"),
            SubsetSize::All,
            0,
        )
        .unwrap();
        let embeddings = embed(&model, &ds, DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(embeddings.vectors, vec![vec![0.5, 0.5]]);

        let missing = model.embed_batch(&[dir.path().join("other.png").as_path()]);
        assert!(matches!(missing, Err(EvalError::MissingEmbedding(_))));
    }

    #[test]
    fn loading_a_missing_embeddings_file_reports_not_found() {
        let dir = tempdir().unwrap();
        let err = PrecomputedEmbeddings::load(&dir.path().join("typo.jsonl"), dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
        assert!(err.to_string().contains("typo.jsonl"));

        let empty = dir.path().join("empty.jsonl");
        fs::write(&empty, "").unwrap();
        let err = PrecomputedEmbeddings::load(&empty, dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::InvalidInput(_)));
    }
}
