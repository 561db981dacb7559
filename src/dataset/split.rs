//! Train/validation/test partitioning of a per-class image pool
//!
//! The dataset root holds one directory per class. Splitting copies every
//! class's files into `<root>/{train,validation,test}/<class>/`:
//!
//! ```text
//! root/
//! ├── cataract/            (source pool, left untouched)
//! ├── glaucoma/
//! ├── train/cataract/      (70%)
//! ├── validation/cataract/ (15%)
//! └── test/cataract/       (15%)
//! ```
//!
//! Ratios are applied per class to keep the class balance. Once all three
//! splits contain files the splitter refuses to reshuffle, so a re-run never
//! leaks test images into training.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::labels::ClassLabels;
use crate::utils::error::{FundusError, Result};

const RATIO_TOLERANCE: f64 = 1e-6;

/// One of the three dataset partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Validation,
    Test,
}

impl DatasetSplit {
    pub const ALL: [DatasetSplit; 3] = [DatasetSplit::Train, DatasetSplit::Validation, DatasetSplit::Test];

    /// Directory name under the dataset root
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Validation => "validation",
            DatasetSplit::Test => "test",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.dir_name() == name)
    }

    /// `<root>/<split>`
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.dir_name())
    }
}

impl std::fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Configuration for dataset splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_ratio: f64,
    pub validation_ratio: f64,
    pub test_ratio: f64,
    /// Shuffle seed. `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.70,
            validation_ratio: 0.15,
            test_ratio: 0.15,
            seed: None,
        }
    }
}

impl SplitConfig {
    /// Create a validated split configuration
    pub fn new(train_ratio: f64, validation_ratio: f64, test_ratio: f64, seed: Option<u64>) -> Result<Self> {
        let config = Self {
            train_ratio,
            validation_ratio,
            test_ratio,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Each ratio must be in [0, 1] and together they must sum to 1
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("train", self.train_ratio),
            ("validation", self.validation_ratio),
            ("test", self.test_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(FundusError::Config(format!(
                    "{} ratio must be between 0.0 and 1.0, got {}",
                    name, ratio
                )));
            }
        }

        let sum = self.train_ratio + self.validation_ratio + self.test_ratio;
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(FundusError::Config(format!(
                "Split ratios must sum to 1.0, got {:.6}",
                sum
            )));
        }
        Ok(())
    }

    /// Cut points for a pool of `n` files: `[0, a)` train, `[a, b)` validation, `[b, n)` test
    pub fn cut_points(&self, n: usize) -> (usize, usize) {
        let train_end = (n as f64 * self.train_ratio).floor() as usize;
        let val_end = train_end + (n as f64 * self.validation_ratio).floor() as usize;
        (train_end.min(n), val_end.min(n))
    }
}

/// File counts per split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl SplitCounts {
    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }

    pub fn get(&self, split: DatasetSplit) -> usize {
        match split {
            DatasetSplit::Train => self.train,
            DatasetSplit::Validation => self.validation,
            DatasetSplit::Test => self.test,
        }
    }

    fn add(&mut self, split: DatasetSplit, n: usize) {
        match split {
            DatasetSplit::Train => self.train += n,
            DatasetSplit::Validation => self.validation += n,
            DatasetSplit::Test => self.test += n,
        }
    }

    /// All three partitions contain at least one file
    pub fn is_complete(&self) -> bool {
        self.train > 0 && self.validation > 0 && self.test > 0
    }
}

impl std::fmt::Display for SplitCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Train: {}, Validation: {}, Test: {}",
            self.train, self.validation, self.test
        )
    }
}

/// What a split run did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitReport {
    /// Per-class counts in label order, skipped classes excluded
    pub per_class: Vec<(String, SplitCounts)>,
    /// Classes whose source directory was missing
    pub skipped: Vec<String>,
    pub seed: Option<u64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SplitReport {
    pub fn totals(&self) -> SplitCounts {
        self.per_class.iter().fold(SplitCounts::default(), |mut acc, (_, c)| {
            acc.train += c.train;
            acc.validation += c.validation;
            acc.test += c.test;
            acc
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl std::fmt::Display for SplitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, counts) in &self.per_class {
            writeln!(f, "  {}: {}", name, counts)?;
        }
        for name in &self.skipped {
            writeln!(f, "  {}: skipped (missing directory)", name)?;
        }
        write!(f, "  total: {}", self.totals())
    }
}

/// Result of asking for a split
#[derive(Debug, Clone)]
pub enum SplitOutcome {
    /// All three splits were already populated, nothing was touched
    AlreadySplit(SplitCounts),
    /// Files were shuffled and copied
    Performed(SplitReport),
}

impl SplitOutcome {
    pub fn counts(&self) -> SplitCounts {
        match self {
            SplitOutcome::AlreadySplit(counts) => *counts,
            SplitOutcome::Performed(report) => report.totals(),
        }
    }
}

/// Partitions `<root>/<class>/` pools into the three split directories
#[derive(Debug, Clone)]
pub struct DatasetSplitter {
    config: SplitConfig,
}

impl DatasetSplitter {
    /// Create a splitter, validating the ratios
    pub fn new(config: SplitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Count the files already present in each split for the given classes
    pub fn existing_counts(root: &Path, labels: &ClassLabels) -> Result<SplitCounts> {
        let mut counts = SplitCounts::default();
        for split in DatasetSplit::ALL {
            for class in labels.iter() {
                let dir = split.dir(root).join(class);
                if dir.is_dir() {
                    counts.add(split, list_files(&dir)?.len());
                }
            }
        }
        Ok(counts)
    }

    /// Split every class pool, unless all three splits are already populated
    pub fn split(&self, root: &Path, labels: &ClassLabels) -> Result<SplitOutcome> {
        let existing = Self::existing_counts(root, labels)?;
        if existing.is_complete() {
            info!("Dataset already split ({}), skipping", existing);
            return Ok(SplitOutcome::AlreadySplit(existing));
        }

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut report = SplitReport {
            per_class: Vec::with_capacity(labels.len()),
            skipped: Vec::new(),
            seed: self.config.seed,
            created_at: chrono::Utc::now(),
        };

        for class in labels.iter() {
            match self.split_class(root, class, &mut rng) {
                Ok(counts) => {
                    info!("{} - {}", class, counts);
                    report.per_class.push((class.to_string(), counts));
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping class {}: {}", class, e);
                    report.skipped.push(class.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SplitOutcome::Performed(report))
    }

    /// Split, but fall back to whatever is on disk if the split step fails
    ///
    /// Errors here never abort the pipeline. They are logged and the existing
    /// layout (possibly partial) is counted instead.
    pub fn split_or_existing(&self, root: &Path, labels: &ClassLabels) -> SplitCounts {
        match self.split(root, labels) {
            Ok(outcome) => outcome.counts(),
            Err(e) => {
                warn!("Dataset split failed: {}. Using the existing layout.", e);
                Self::existing_counts(root, labels).unwrap_or_default()
            }
        }
    }

    fn split_class(&self, root: &Path, class: &str, rng: &mut ChaCha8Rng) -> Result<SplitCounts> {
        let source = root.join(class);
        if !source.is_dir() {
            return Err(FundusError::MissingClassDir(source));
        }

        let mut files = list_files(&source)?;
        files.shuffle(rng);

        let (train_end, val_end) = self.config.cut_points(files.len());
        let parts = [
            (DatasetSplit::Train, &files[..train_end]),
            (DatasetSplit::Validation, &files[train_end..val_end]),
            (DatasetSplit::Test, &files[val_end..]),
        ];

        let mut counts = SplitCounts::default();
        for (split, part) in parts {
            let dest_dir = split.dir(root).join(class);
            std::fs::create_dir_all(&dest_dir)?;
            for name in part {
                std::fs::copy(source.join(name), dest_dir.join(name))?;
            }
            counts.add(split, part.len());
            debug!("{}/{}: {} files", split, class, part.len());
        }
        Ok(counts)
    }
}

/// Regular file names directly inside `dir`, sorted
fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
