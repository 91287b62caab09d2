//! Source dataset discovery and per-test-instance folder materialization.
//!
//! Source layout: `root/original/<case>/{train/good, test/good, test/<defect>}`.
//! Generated layout: `root/case<N>-<sub>-<case>-<defect>/{train, test}/<class>/...`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::{starts_alphanumeric, GOOD_CLASS};
use crate::error::{EvalError, Result};
use crate::protocol::Protocol;

pub const ORIGINAL_DIR: &str = "original";
pub const INSTANCE_PREFIX: &str = "case";
pub const MODELS_DIR: &str = "models";

/// How files land in a generated test instance folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialize {
    #[default]
    Copy,
    /// Symbolic links to the source files; falls back to copying off unix.
    Symlink,
}

/// Cases and their sub-cases as found under `root/original`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    cases: Vec<String>,
    subs: Vec<Vec<String>>,
}

impl DatasetLayout {
    /// Every case folder under `root/original`, sorted.
    pub fn discover(root: &Path) -> Result<Self> {
        let cases = list_dirs(&root.join(ORIGINAL_DIR))?;
        Self::with_cases(root, cases)
    }

    /// Sub-cases of each listed case: defect folders under `test/` other than `good`.
    pub fn with_cases(root: &Path, cases: Vec<String>) -> Result<Self> {
        let mut subs = Vec::with_capacity(cases.len());
        for case in &cases {
            let test_dir = root.join(ORIGINAL_DIR).join(case).join("test");
            let defects: Vec<String> = list_dirs(&test_dir)?
                .into_iter()
                .filter(|name| name != GOOD_CLASS)
                .collect();
            if defects.is_empty() {
                warn!(case = %case, "case has no defect sub-cases");
            }
            subs.push(defects);
        }
        Ok(Self {
            root: root.to_path_buf(),
            cases,
            subs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cases(&self) -> &[String] {
        &self.cases
    }

    pub fn subs(&self) -> &[Vec<String>] {
        &self.subs
    }

    pub fn n_cases(&self) -> usize {
        self.cases.len()
    }

    pub fn n_subs(&self, case_no: usize) -> usize {
        self.subs.get(case_no).map(Vec::len).unwrap_or(0)
    }

    /// Sub-case count of every case.
    pub fn shape(&self) -> Vec<usize> {
        self.subs.iter().map(Vec::len).collect()
    }

    pub fn case(&self, case_no: usize) -> Option<&str> {
        self.cases.get(case_no).map(String::as_str)
    }

    pub fn sub(&self, case_no: usize, sub_no: usize) -> Option<&str> {
        self.subs.get(case_no)?.get(sub_no).map(String::as_str)
    }

    /// Every sub-case of the case except the selected one.
    pub fn sub_tests(&self, case_no: usize, sub_no: usize) -> Vec<&str> {
        let selected = self.sub(case_no, sub_no);
        self.subs
            .get(case_no)
            .map(|subs| {
                subs.iter()
                    .map(String::as_str)
                    .filter(|s| Some(*s) != selected)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn check(&self, case_no: usize, sub_no: usize) -> Result<()> {
        if self.sub(case_no, sub_no).is_none() {
            return Err(EvalError::InvalidInput(format!(
                "no sub-case {sub_no} in case {case_no} ({} cases)",
                self.n_cases()
            )));
        }
        Ok(())
    }

    /// `case<N>-<sub>-<case>-<defect>`.
    pub fn instance_name(&self, case_no: usize, sub_no: usize) -> Result<String> {
        self.check(case_no, sub_no)?;
        Ok(format!(
            "{INSTANCE_PREFIX}{case_no}-{sub_no}-{}-{}",
            self.cases[case_no], self.subs[case_no][sub_no]
        ))
    }

    pub fn instance_folder(&self, case_no: usize, sub_no: usize) -> Result<PathBuf> {
        Ok(self.root.join(self.instance_name(case_no, sub_no)?))
    }

    pub fn source_case_dir(&self, case_no: usize) -> PathBuf {
        self.root.join(ORIGINAL_DIR).join(&self.cases[case_no])
    }

    /// Recreates one instance folder: `train/` gets good plus the held-out defect,
    /// `test/` gets good plus every defect of the case, the held-out one included.
    pub fn build_instance(
        &self,
        case_no: usize,
        sub_no: usize,
        materialize: Materialize,
    ) -> Result<PathBuf> {
        let folder = self.instance_folder(case_no, sub_no)?;
        let source = self.source_case_dir(case_no);
        let held_out = &self.subs[case_no][sub_no];
        if folder.exists() {
            fs::remove_dir_all(&folder)?;
        }
        let train = folder.join("train");
        let test = folder.join("test");
        fs::create_dir_all(&train)?;
        fs::create_dir_all(&test)?;

        copy_class_dir(&source.join("train").join(GOOD_CLASS), &train, materialize)?;
        copy_class_dir(&source.join("test").join(held_out), &train, materialize)?;
        copy_class_dir(&source.join("test").join(GOOD_CLASS), &test, materialize)?;
        for defect in &self.subs[case_no] {
            copy_class_dir(&source.join("test").join(defect), &test, materialize)?;
        }

        info!(instance = %folder.display(), "built test instance");
        debug!(
            train = ?list_dirs(&train).unwrap_or_default(),
            test = ?list_dirs(&test).unwrap_or_default(),
            "instance classes"
        );
        Ok(folder)
    }

    pub fn build_all(&self, materialize: Materialize) -> Result<Vec<PathBuf>> {
        let mut built = Vec::new();
        for case_no in 0..self.n_cases() {
            for sub_no in 0..self.n_subs(case_no) {
                built.push(self.build_instance(case_no, sub_no, materialize)?);
            }
        }
        Ok(built)
    }
}

/// Options for [`build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildOptions {
    pub materialize: Materialize,
    /// Compute sub-case lists without touching the filesystem.
    pub skip_data_creation: bool,
}

/// Lays out test instance folders for `cases` under `root` according to `protocol`
/// and returns the sub-case names of each case.
pub fn build(
    protocol: Protocol,
    cases: &[String],
    root: &Path,
    options: BuildOptions,
) -> Result<Vec<Vec<String>>> {
    protocol.ensure_implemented()?;
    let layout = DatasetLayout::with_cases(root, cases.to_vec())?;
    if !options.skip_data_creation {
        layout.build_all(options.materialize)?;
    }
    Ok(layout.subs)
}

/// Removes every generated instance folder directly under `root`.
pub fn clean_generated(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !root.is_dir() {
        return Ok(removed);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_instance_name(&name) || !entry.file_type()?.is_dir() {
            continue;
        }
        fs::remove_dir_all(entry.path())?;
        removed.push(entry.path());
    }
    removed.sort();
    info!(count = removed.len(), root = %root.display(), "removed generated test instances");
    Ok(removed)
}

/// Deletes saved model folders left by trainers inside generated instance folders.
pub fn purge_models(root: &Path) -> Result<usize> {
    let mut targets = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() > 1 || is_instance_dir(e))
        .filter_map(|e| e.ok())
    {
        if entry.depth() > 1 && entry.file_type().is_dir() && entry.file_name() == MODELS_DIR {
            targets.push(entry.into_path());
        }
    }
    let mut removed = 0;
    for target in targets {
        if target.exists() {
            fs::remove_dir_all(&target)?;
            removed += 1;
        }
    }
    debug!(removed, "purged saved models");
    Ok(removed)
}

/// True for `case<N>-<sub>-<rest>` with a non-empty rest.
pub fn is_instance_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(INSTANCE_PREFIX) else {
        return false;
    };
    let mut parts = rest.splitn(3, '-');
    let is_number = |part: Option<&str>| {
        part.map(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    };
    is_number(parts.next()) && is_number(parts.next()) && parts.next().is_some_and(|p| !p.is_empty())
}

fn is_instance_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir() && is_instance_name(&entry.file_name().to_string_lossy())
}

/// Sorted names of sub-directories whose name starts with an ASCII alphanumeric.
fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(EvalError::MissingSource(dir.to_path_buf()));
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_dir() || !starts_alphanumeric(&entry.path()) {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Places `src` under `dest_parent/<src name>`.
fn copy_class_dir(src: &Path, dest_parent: &Path, materialize: Materialize) -> Result<()> {
    if !src.is_dir() {
        return Err(EvalError::MissingSource(src.to_path_buf()));
    }
    let name = src
        .file_name()
        .ok_or_else(|| EvalError::InvalidInput(format!("no folder name in {}", src.display())))?;
    let dest = dest_parent.join(name);
    for entry in WalkDir::new(src).into_iter() {
        let entry = entry.map_err(|e| EvalError::Other(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| EvalError::Other(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            place_file(entry.path(), &target, materialize)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn place_file(src: &Path, target: &Path, materialize: Materialize) -> Result<()> {
    match materialize {
        Materialize::Copy => {
            fs::copy(src, target)?;
        }
        Materialize::Symlink => {
            let absolute = fs::canonicalize(src)?;
            std::os::unix::fs::symlink(absolute, target)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn place_file(src: &Path, target: &Path, materialize: Materialize) -> Result<()> {
    if materialize == Materialize::Symlink {
        warn!("symlink materialization unsupported on this platform, copying");
    }
    fs::copy(src, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, path.to_string_lossy().as_bytes()).unwrap();
    }

    fn sample_source(root: &Path) {
        let bottle = root.join("original/bottle");
        touch(&bottle.join("train/good/000.png"));
        touch(&bottle.join("train/good/001.png"));
        touch(&bottle.join("test/good/000.png"));
        touch(&bottle.join("test/broken/000.png"));
        touch(&bottle.join("test/contamination/000.png"));
        fs::create_dir_all(bottle.join("test/_ignored")).unwrap();
        let grid = root.join("original/grid");
        touch(&grid.join("train/good/000.png"));
        touch(&grid.join("test/good/000.png"));
        touch(&grid.join("test/bent/000.png"));
    }

    #[test]
    fn discover_lists_cases_and_defects() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        assert_eq!(layout.cases(), ["bottle".to_string(), "grid".to_string()]);
        assert_eq!(layout.shape(), vec![2, 1]);
        assert_eq!(layout.sub(0, 1), Some("contamination"));
        assert_eq!(layout.sub_tests(0, 0), vec!["contamination"]);
        assert_eq!(
            layout.instance_name(0, 1).unwrap(),
            "case0-1-bottle-contamination"
        );
        assert!(layout.instance_name(1, 1).is_err());
    }

    #[test]
    fn build_instance_holds_out_defect_in_train_and_test() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        let folder = layout.build_instance(0, 0, Materialize::Copy).unwrap();
        assert_eq!(list_dirs(&folder.join("train")).unwrap(), vec!["broken", "good"]);
        assert_eq!(
            list_dirs(&folder.join("test")).unwrap(),
            vec!["broken", "contamination", "good"]
        );
        assert_eq!(
            fs::read_dir(folder.join("train/good")).unwrap().count(),
            2
        );
    }

    #[test]
    fn rebuilding_replaces_stale_content() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        let folder = layout.build_instance(1, 0, Materialize::Copy).unwrap();
        touch(&folder.join("train/stale/000.png"));
        layout.build_instance(1, 0, Materialize::Copy).unwrap();
        assert!(!folder.join("train/stale").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_materialization_points_at_sources() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        let folder = layout.build_instance(1, 0, Materialize::Symlink).unwrap();
        let link = folder.join("test/bent/000.png");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let content = fs::read_to_string(&link).unwrap();
        assert!(content.ends_with("original/grid/test/bent/000.png"));
    }

    #[test]
    fn build_respects_skip_and_protocol() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let cases = vec!["grid".to_string()];
        let subs = build(
            Protocol::LeaveOneOut,
            &cases,
            dir.path(),
            BuildOptions {
                skip_data_creation: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(subs, vec![vec!["bent".to_string()]]);
        assert!(!dir.path().join("case0-0-grid-bent").exists());

        let err = build(Protocol::Mixed, &cases, dir.path(), BuildOptions::default()).unwrap_err();
        assert!(matches!(err, EvalError::NotImplemented(_)));
    }

    #[test]
    fn clean_removes_only_generated_folders() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        layout.build_all(Materialize::Copy).unwrap();
        fs::write(dir.path().join("case-notes.txt"), "keep").unwrap();
        let removed = clean_generated(dir.path()).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(dir.path().join("original/bottle/test/broken/000.png").exists());
        assert!(dir.path().join("case-notes.txt").exists());
    }

    #[test]
    fn purge_models_skips_original_tree() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        fs::create_dir_all(dir.path().join("original/bottle/models")).unwrap();
        fs::create_dir_all(dir.path().join("case0-0-bottle-broken/models")).unwrap();
        assert_eq!(purge_models(dir.path()).unwrap(), 1);
        assert!(dir.path().join("original/bottle/models").exists());
    }

    #[test]
    fn clean_keeps_folders_that_only_share_the_prefix() {
        let dir = tempdir().unwrap();
        sample_source(dir.path());
        let layout = DatasetLayout::discover(dir.path()).unwrap();
        layout.build_instance(0, 0, Materialize::Copy).unwrap();
        touch(&dir.path().join("cases_archive/notes.txt"));
        touch(&dir.path().join("casebook/x.txt"));
        touch(&dir.path().join("case1-x-grid-bent/keep.txt"));
        let removed = clean_generated(dir.path()).unwrap();
        assert_eq!(removed, vec![dir.path().join("case0-0-bottle-broken")]);
        assert!(dir.path().join("cases_archive/notes.txt").exists());
        assert!(dir.path().join("casebook/x.txt").exists());
        assert!(dir.path().join("case1-x-grid-bent/keep.txt").exists());
    }

    #[test]
    fn purge_models_leaves_models_outside_instances() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("pretrained/models/resnet.bin"));
        touch(&dir.path().join("models/shared.bin"));
        touch(&dir.path().join("case0-0-bottle-broken/models/model.bin"));
        assert_eq!(purge_models(dir.path()).unwrap(), 1);
        assert!(dir.path().join("pretrained/models/resnet.bin").exists());
        assert!(dir.path().join("models/shared.bin").exists());
        assert!(!dir.path().join("case0-0-bottle-broken/models").exists());
    }

    #[test]
    fn instance_names_need_case_and_sub_numbers() {
        assert!(is_instance_name("case0-0-bottle-broken"));
        assert!(is_instance_name("case12-3-metal_nut-color"));
        assert!(!is_instance_name("cases_archive"));
        assert!(!is_instance_name("casebook"));
        assert!(!is_instance_name("case-notes"));
        assert!(!is_instance_name("case1-2-"));
        assert!(!is_instance_name("case1-b-grid"));
    }
}
