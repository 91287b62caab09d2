use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{EvalError, Result};

pub const GOOD_CLASS: &str = "good";
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// How many samples of a folder to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SubsetSize {
    #[default]
    All,
    Fraction(f64),
    Count(usize),
}

impl SubsetSize {
    /// `1.0` keeps everything, `(0, 1)` is a share, larger whole numbers are counts.
    pub fn from_value(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(EvalError::InvalidInput(format!(
                "subset size must be positive, got {value}"
            )));
        }
        if value == 1.0 {
            Ok(SubsetSize::All)
        } else if value < 1.0 {
            Ok(SubsetSize::Fraction(value))
        } else if value.fract() == 0.0 {
            Ok(SubsetSize::Count(value as usize))
        } else {
            Err(EvalError::InvalidInput(format!(
                "subset size above 1 must be a whole number, got {value}"
            )))
        }
    }

    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            SubsetSize::All => total,
            SubsetSize::Fraction(share) => {
                let wanted = (total as f64 * share).round() as usize;
                wanted.clamp(total.min(1), total)
            }
            SubsetSize::Count(count) => count.min(total),
        }
    }
}

impl fmt::Display for SubsetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubsetSize::All => f.write_str("all"),
            SubsetSize::Fraction(share) => write!(f, "{share}"),
            SubsetSize::Count(count) => write!(f, "{count}"),
        }
    }
}

impl FromStr for SubsetSize {
    type Err = EvalError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(SubsetSize::All);
        }
        let parsed: f64 = trimmed
            .parse()
            .map_err(|_| EvalError::InvalidInput(format!("invalid subset size {value:?}")))?;
        SubsetSize::from_value(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledFile {
    pub path: PathBuf,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Image samples of a folder, labeled by the name of their parent directory.
#[derive(Debug, Clone)]
pub struct FolderDataset {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl FolderDataset {
    pub fn open(root: &Path, subset: SubsetSize, seed: u64) -> Result<Self> {
        if !root.is_dir() {
            return Err(EvalError::MissingSource(root.to_path_buf()));
        }
        let files = list_images(root)?;
        let files = subsample(files, subset, seed);
        let classes: Vec<String> = files
            .iter()
            .filter_map(|path| parent_name(path))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let samples = files
            .into_iter()
            .filter_map(|path| {
                let name = parent_name(&path)?;
                let label = classes.iter().position(|c| *c == name)?;
                Some(Sample { path, label })
            })
            .collect();
        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
        })
    }

    pub fn from_parts(root: PathBuf, classes: Vec<String>, samples: Vec<Sample>) -> Result<Self> {
        if let Some(bad) = samples.iter().find(|s| s.label >= classes.len()) {
            return Err(EvalError::InvalidInput(format!(
                "sample {} has label {} outside vocabulary of {} classes",
                bad.path.display(),
                bad.label,
                classes.len()
            )));
        }
        Ok(Self {
            root,
            classes,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    pub fn class_index(&self, class: &str) -> Result<usize> {
        self.classes
            .iter()
            .position(|c| c == class)
            .ok_or_else(|| EvalError::MissingClass {
                class: class.to_string(),
                vocabulary: self.classes.clone(),
            })
    }

    /// Index of the normal class in this dataset's vocabulary.
    pub fn good_index(&self) -> Result<usize> {
        self.class_index(GOOD_CLASS)
    }

    /// Sample path relative to the dataset root, `/`-separated.
    pub fn sample_name(&self, idx: usize) -> String {
        self.samples
            .get(idx)
            .map(|s| relative_name(&self.root, &s.path))
            .unwrap_or_default()
    }

    pub fn label_name(&self, idx: usize) -> &str {
        self.samples
            .get(idx)
            .and_then(|s| self.classes.get(s.label))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn class_counts(&self) -> IndexMap<&str, usize> {
        let mut counts: IndexMap<&str, usize> =
            self.classes.iter().map(|c| (c.as_str(), 0)).collect();
        for sample in &self.samples {
            if let Some(count) = counts.get_index_mut(sample.label) {
                *count.1 += 1;
            }
        }
        counts
    }
}

/// Image files under `root` whose names start with an ASCII alphanumeric, sorted by path.
pub fn list_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::NotFound) => {
                continue
            }
            Err(err) => return Err(EvalError::Other(err.to_string())),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !starts_alphanumeric(path) || !is_image(path) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Repeats random members of minority classes until every class matches the largest one.
pub fn balance_by_oversampling(files: Vec<LabeledFile>, rng: &mut StdRng) -> Vec<LabeledFile> {
    let mut by_class: IndexMap<String, Vec<LabeledFile>> = IndexMap::new();
    for file in files {
        by_class.entry(file.label.clone()).or_default().push(file);
    }
    by_class.sort_keys();
    let target = by_class.values().map(Vec::len).max().unwrap_or(0);
    let mut balanced = Vec::with_capacity(target * by_class.len());
    for (_, members) in by_class {
        let extra = target - members.len();
        let picks: Vec<LabeledFile> = (0..extra)
            .filter_map(|_| members.choose(rng).cloned())
            .collect();
        balanced.extend(members);
        balanced.extend(picks);
    }
    balanced
}

pub(crate) fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub(crate) fn starts_alphanumeric(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.chars().next())
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn parent_name(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn subsample(files: Vec<PathBuf>, subset: SubsetSize, seed: u64) -> Vec<PathBuf> {
    let keep = subset.resolve(files.len());
    if keep >= files.len() {
        return files;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, files.len(), keep).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| files[i].clone()).collect()
}
