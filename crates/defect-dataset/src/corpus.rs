//! Class-per-directory image corpus.
//!
//! `root/<class_name>/**/<image>`: class names are the sorted immediate
//! subdirectories of `root` and get contiguous indices from 0. Images are
//! ordered by path, so two scans of the same tree yield the same sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use defect_core::{ClassLabel, ClassMapping, Error, Result, Sample};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Accepted image extensions (case-insensitive).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Sorted, non-hidden immediate subdirectories of `root`.
fn scan_class_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "corpus directory not found: {}",
            root.display()
        )));
    }

    let mut classes = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_hidden(&name) {
            classes.push(name);
        }
    }
    classes.sort();

    if classes.is_empty() {
        return Err(Error::Dataset(format!(
            "no class directories under {}",
            root.display()
        )));
    }
    Ok(classes)
}

/// Images of each class in label order; a missing class directory yields none.
fn collect_samples(root: &Path, classes: &[String]) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (label, class) in classes.iter().enumerate() {
        let before = samples.len();
        let class_dir = root.join(class);
        if class_dir.is_dir() {
            let walker = WalkDir::new(class_dir)
                .min_depth(1)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(&e.file_name().to_string_lossy()));
            for entry in walker {
                let entry = entry.map_err(|e| Error::Dataset(e.to_string()))?;
                if entry.file_type().is_file() && is_image(entry.path()) {
                    samples.push(Sample::new(entry.path(), label));
                }
            }
        }
        let found = samples.len() - before;
        if found == 0 {
            warn!("Class '{}' has no images", class);
        }
        debug!("Class {} '{}': {} images", label, class, found);
    }
    Ok(samples)
}

#[derive(Debug, Clone)]
pub struct ImageCorpus {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageCorpus {
    /// Scan `root` for class directories and their images.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let classes = scan_class_dirs(root)?;
        let samples = collect_samples(root, &classes)?;
        Ok(Self::finish(root, classes, samples))
    }

    /// Scan `root`, labelling images with a trained model's class mapping.
    ///
    /// Directories the mapping does not know are rejected. Mapped classes
    /// without a directory simply contribute no samples.
    pub fn open_with_mapping(root: impl AsRef<Path>, mapping: &ClassMapping) -> Result<Self> {
        let root = root.as_ref();
        let dirs = scan_class_dirs(root)?;
        let unknown: Vec<&String> = dirs.iter().filter(|d| mapping.index_of(d).is_none()).collect();
        if !unknown.is_empty() {
            return Err(Error::Config(format!(
                "classes {:?} under {} are not in the model's mapping {:?}",
                unknown,
                root.display(),
                mapping.classes
            )));
        }
        for class in mapping.classes.iter().filter(|c| !dirs.contains(c)) {
            warn!("Class '{}' has no directory under {:?}", class, root);
        }

        let classes = mapping.classes.clone();
        let samples = collect_samples(root, &classes)?;
        Ok(Self::finish(root, classes, samples))
    }

    fn finish(root: &Path, classes: Vec<String>, samples: Vec<Sample>) -> Self {
        info!(
            "Loaded corpus {:?}: {} classes, {} images",
            root,
            classes.len(),
            samples.len()
        );
        Self {
            root: root.to_path_buf(),
            classes,
            samples,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
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

    pub fn class_name(&self, label: ClassLabel) -> Option<&str> {
        self.classes.get(label).map(String::as_str)
    }

    pub fn mapping(&self) -> Result<ClassMapping> {
        ClassMapping::new(self.classes.clone())
    }

    /// Keep only the first `n` samples in corpus order.
    pub fn truncate(&mut self, n: usize) {
        self.samples.truncate(n);
    }

    pub fn stats(&self) -> CorpusStats {
        let mut per_class: BTreeMap<String, usize> =
            self.classes.iter().map(|c| (c.clone(), 0)).collect();
        for sample in &self.samples {
            if let Some(count) = per_class.get_mut(&self.classes[sample.label]) {
                *count += 1;
            }
        }
        CorpusStats {
            total_samples: self.samples.len(),
            per_class,
        }
    }
}

/// Per-class image counts
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CorpusStats {
    pub total_samples: usize,
    pub per_class: BTreeMap<String, usize>,
}

impl CorpusStats {
    pub fn log(&self) {
        info!("Corpus: {} images", self.total_samples);
        for (class, count) in &self.per_class {
            info!("  {:<30} {:>6}", class, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_image;

    fn build_tree(root: &Path) {
        write_image(&root.join("Wall_Crack/b.png"), [200, 0, 0], 8);
        write_image(&root.join("Wall_Crack/a.png"), [200, 0, 0], 8);
        write_image(&root.join("Electrical/x.PNG"), [0, 200, 0], 8);
        write_image(&root.join("Electrical/nested/y.png"), [0, 200, 0], 8);
        std::fs::create_dir_all(root.join("Plumbing")).unwrap();
        std::fs::write(root.join("Wall_Crack/notes.txt"), "skip me").unwrap();
        std::fs::write(root.join("README.md"), "top-level file").unwrap();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
    }

    #[test]
    fn test_classes_sorted_and_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let corpus = ImageCorpus::open(dir.path()).unwrap();
        assert_eq!(corpus.classes(), &["Electrical", "Plumbing", "Wall_Crack"]);
        assert_eq!(corpus.class_name(2), Some("Wall_Crack"));
        assert_eq!(corpus.mapping().unwrap().num_classes(), 3);
    }

    #[test]
    fn test_samples_ordered_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let corpus = ImageCorpus::open(dir.path()).unwrap();
        let names: Vec<(String, usize)> = corpus
            .samples()
            .iter()
            .map(|s| {
                let rel = s.path.strip_prefix(dir.path()).unwrap();
                (rel.to_string_lossy().replace('\\', "/"), s.label)
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("Electrical/nested/y.png".to_string(), 0),
                ("Electrical/x.PNG".to_string(), 0),
                ("Wall_Crack/a.png".to_string(), 2),
                ("Wall_Crack/b.png".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_stats_include_empty_class() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let stats = ImageCorpus::open(dir.path()).unwrap().stats();
        assert_eq!(stats.total_samples, 4);
        assert_eq!(stats.per_class["Plumbing"], 0);
        assert_eq!(stats.per_class["Electrical"], 2);
    }

    #[test]
    fn test_missing_root_and_no_classes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageCorpus::open(dir.path().join("missing")),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(ImageCorpus::open(dir.path()), Err(Error::Dataset(_))));
    }

    #[test]
    fn test_unknown_class_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let known = ClassMapping::new(vec!["Electrical".into(), "Wall_Crack".into()]).unwrap();
        assert!(matches!(
            ImageCorpus::open_with_mapping(dir.path(), &known),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_mapping_drives_labels_when_class_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("B/one.png"), [0, 0, 200], 8);
        write_image(&dir.path().join("A/two.png"), [200, 0, 0], 8);

        let mapping = ClassMapping::new(vec!["A".into(), "B".into(), "C".into()]).unwrap();
        let corpus = ImageCorpus::open_with_mapping(dir.path(), &mapping).unwrap();

        assert_eq!(corpus.classes(), &["A", "B", "C"]);
        let labels: Vec<usize> = corpus.samples().iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![0, 1]);
        assert_eq!(corpus.stats().per_class["C"], 0);
    }

    #[test]
    fn test_mapping_order_overrides_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let mapping = ClassMapping::new(vec![
            "Wall_Crack".into(),
            "Plumbing".into(),
            "Electrical".into(),
        ])
        .unwrap();
        let corpus = ImageCorpus::open_with_mapping(dir.path(), &mapping).unwrap();
        assert_eq!(corpus.samples()[0].label, 0);
        assert!(corpus.samples()[0].path.ends_with("Wall_Crack/a.png"));
        assert_eq!(corpus.samples().last().unwrap().label, 2);
    }

    #[test]
    fn test_truncate() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        let mut corpus = ImageCorpus::open(dir.path()).unwrap();
        corpus.truncate(1);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.samples()[0].label, 0);
    }
}
