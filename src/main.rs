//! Fundus Classifier CLI
//!
//! Entry point for splitting a fundus image pool, training the transfer
//! learning model, evaluating saved artifacts and classifying single images.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::module::AutodiffModule;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use fundus_classifier::artifact::{load_complete, read_manifest, save_artifacts, ArtifactManifest};
use fundus_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use fundus_classifier::dataset::folder::is_image_file;
use fundus_classifier::dataset::{
    AugmentationConfig, Augmenter, ClassLabels, DatasetSplit, DatasetSplitter, FolderDataset,
    FundusDataLoader, SplitOutcome,
};
use fundus_classifier::evaluation::{EvaluationReport, Evaluator};
use fundus_classifier::inference::Predictor;
use fundus_classifier::training::{StopReason, Trainer};
use fundus_classifier::utils::charts::generate_history_chart;
use fundus_classifier::utils::logging::{init_logging, LogConfig};
use fundus_classifier::{FundusError, PipelineConfig};

/// Eye-fundus disease classification with Burn
///
/// Transfer learning on a frozen MobileNetV2 backbone with a small trainable
/// head, from a per-class image folder to a servable model artifact.
#[derive(Parser, Debug)]
#[command(name = "fundus_classifier")]
#[command(version)]
#[command(about = "Eye-fundus image classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Pipeline configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split the per-class image pool into train/validation/test directories
    Split {
        /// Dataset root with one directory per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Split (if needed), train, save artifacts and evaluate on the test split
    Train {
        /// Dataset root with one directory per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training and evaluation
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Output directory for checkpoints, artifacts and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Seed for splitting, shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Pretrained MobileNetV2 backbone record
        #[arg(long)]
        pretrained: Option<PathBuf>,

        /// Disable training-time augmentation
        #[arg(long, default_value = "false")]
        no_augmentation: bool,
    },

    /// Evaluate a saved model on a split directory
    Evaluate {
        /// Combined model artifact (`*_complete.bin`)
        #[arg(short, long)]
        model: PathBuf,

        /// Directory with one subdirectory per class
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Batch size
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Write reports into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Classify a single image or every image in a directory
    Predict {
        /// Combined model artifact (`*_complete.bin`)
        #[arg(short, long)]
        model: PathBuf,

        /// Image file or directory of images
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the manifest of a combined model artifact
    Inspect {
        /// Combined model artifact (`*_complete.bin`)
        #[arg(short, long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    print_banner();
    info!("Backend: {}", backend_name());

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Split { data_dir, seed } => {
            if let Some(dir) = data_dir {
                config.dataset.root = dir;
            }
            if let Some(seed) = seed {
                config.split.seed = Some(seed);
            }
            config.validate()?;
            cmd_split(&config)?;
        }

        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            output_dir,
            seed,
            pretrained,
            no_augmentation,
        } => {
            let overrides = TrainOverrides {
                data_dir,
                epochs,
                batch_size,
                learning_rate,
                output_dir,
                seed,
                pretrained,
                no_augmentation,
            };
            apply_overrides(&mut config, overrides);
            config.validate()?;
            cmd_train(&config)?;
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
            output_dir,
        } => {
            cmd_evaluate(&model, &data_dir, batch_size, output_dir.as_deref())?;
        }

        Commands::Predict { model, input } => {
            cmd_predict(&model, &input)?;
        }

        Commands::Inspect { model } => {
            cmd_inspect(&model)?;
        }
    }

    Ok(())
}

struct TrainOverrides {
    data_dir: Option<PathBuf>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    output_dir: Option<PathBuf>,
    seed: Option<u64>,
    pretrained: Option<PathBuf>,
    no_augmentation: bool,
}

fn apply_overrides(config: &mut PipelineConfig, args: TrainOverrides) {
    if let Some(dir) = args.data_dir {
        config.dataset.root = dir;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
        config.split.seed = Some(seed);
    }
    if let Some(path) = args.pretrained {
        config.model.pretrained_weights = Some(path);
    }
    if args.no_augmentation {
        config.augmentation = AugmentationConfig::none();
    }
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +----------------------------------------------------------+
 |   Fundus Classifier                                      |
 |   Eye disease classification with Burn + Rust           |
 +----------------------------------------------------------+
  "#
        .green()
    );
}

fn print_labels(labels: &ClassLabels) {
    println!("{}", "Class indices:".cyan().bold());
    for (i, name) in labels.iter().enumerate() {
        println!("  {} -> {}", i, name);
    }
}

fn cmd_split(config: &PipelineConfig) -> Result<()> {
    let root = &config.dataset.root;
    let labels = config.labels().context("Failed to determine classes")?;
    print_labels(&labels);

    let splitter = DatasetSplitter::new(config.split.clone())?;
    match splitter.split(root, &labels)? {
        SplitOutcome::AlreadySplit(counts) => {
            println!("{} Dataset already split: {}", "Note:".yellow(), counts);
        }
        SplitOutcome::Performed(report) => {
            let report_path = root.join("split_report.json");
            report.save(&report_path)?;
            println!("{}", "Split complete:".green().bold());
            println!("{}", report);
            println!("  Report: {}", report_path.display());
        }
    }
    Ok(())
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    let root = &config.dataset.root;
    let out_dir = &config.output.dir;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    config.save(&out_dir.join("config.toml"))?;

    let labels = config.labels().context("Failed to determine classes")?;
    print_labels(&labels);

    println!("{}", "Preparing splits...".cyan());
    let counts = match DatasetSplitter::new(config.split.clone()) {
        Ok(splitter) => splitter.split_or_existing(root, &labels),
        Err(e) if e.is_recoverable() => {
            warn!("Skipping split step: {}", e);
            DatasetSplitter::existing_counts(root, &labels).unwrap_or_default()
        }
        Err(e) => return Err(e.into()),
    };
    println!("  {}", counts);

    let open = |split: DatasetSplit| FolderDataset::with_labels(&split.dir(root), labels.clone());
    let train_set = open(DatasetSplit::Train).context("Failed to open training split")?;
    let valid_set = open(DatasetSplit::Validation).context("Failed to open validation split")?;

    let device = default_device();
    let recipe = config.recipe();
    let batch_size = config.training.batch_size;

    let train_loader = FundusDataLoader::<TrainingBackend>::training(
        train_set,
        recipe.clone(),
        Augmenter::new(config.augmentation.clone()),
        batch_size,
        config.training.seed,
        device.clone(),
    );
    let valid_loader =
        FundusDataLoader::<DefaultBackend>::evaluation(valid_set, recipe.clone(), batch_size, device.clone());

    let model_config = config.classifier(labels.len());
    let model = model_config
        .init::<TrainingBackend>(&device)
        .context("Failed to build model")?;

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Training samples:   {}", train_loader.dataset().samples().len());
    println!("  Validation samples: {}", valid_loader.dataset().samples().len());
    println!("  Epochs:             {}", config.training.epochs);
    println!("  Batch size:         {}", batch_size);
    println!("  Learning rate:      {}", config.training.learning_rate);
    println!("  Input size:         {}x{}", recipe.image_width, recipe.image_height);
    println!("  Device:             {:?}", device);
    println!();

    let trainer = Trainer::<TrainingBackend>::new(config.training.clone(), device.clone())
        .with_checkpoint(out_dir.join("checkpoint.mpk"));
    let outcome = trainer
        .fit(model, &train_loader, &valid_loader)
        .context("Training failed")?;
    let history = outcome.history;

    history.save(&out_dir.join("history.json"))?;
    generate_history_chart(&history, &out_dir.join("training_history.svg"))?;
    match history.stop_reason {
        StopReason::EarlyStopping => println!(
            "{} Stopped early after {} epochs, best epoch {}",
            "Note:".yellow(),
            history.epochs_run(),
            history.best_epoch.map(|e| e + 1).unwrap_or(0)
        ),
        StopReason::MaxEpochs => println!(
            "{} Completed {} epochs",
            "Done:".green(),
            history.epochs_run()
        ),
    }

    let model = outcome.model.valid();
    let manifest = ArtifactManifest::new(model_config, labels.clone(), recipe.clone());
    let paths = save_artifacts(&model, &manifest, out_dir, &config.output.model_stem)?;
    println!("{}", "Saved model:".green().bold());
    println!("  {}", paths.description.display());
    println!("  {}", paths.weights.display());
    println!("  {}", paths.complete.display());

    let test_dir = DatasetSplit::Test.dir(root);
    let test_set = match FolderDataset::with_labels(&test_dir, labels) {
        Ok(set) if !set.samples().is_empty() => set,
        _ => {
            warn!("No test images in {:?}, skipping evaluation", test_dir);
            return Ok(());
        }
    };

    println!();
    println!("{}", "Evaluating on the test split...".cyan());
    let test_loader = FundusDataLoader::<DefaultBackend>::evaluation(test_set, recipe, batch_size, device);
    let report = Evaluator::evaluate(&model, &test_loader)?;
    report.write_reports(out_dir)?;
    print_report(&report);

    Ok(())
}

fn cmd_evaluate(
    model_path: &Path,
    data_dir: &Path,
    batch_size: usize,
    output_dir: Option<&Path>,
) -> Result<()> {
    let device = default_device();
    let (model, manifest) = load_complete::<DefaultBackend>(model_path, &device)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;

    let dataset = FolderDataset::with_labels(data_dir, manifest.labels.clone())?;
    let loader = FundusDataLoader::<DefaultBackend>::evaluation(
        dataset,
        manifest.recipe.clone(),
        batch_size,
        device,
    );

    let report = Evaluator::evaluate(&model, &loader)?;
    print_report(&report);

    if let Some(dir) = output_dir {
        let paths = report.write_reports(dir)?;
        println!("  Reports written to {}", paths.json.parent().unwrap_or(dir).display());
    }
    Ok(())
}

fn cmd_predict(model_path: &Path, input: &Path) -> Result<()> {
    let predictor = Predictor::<DefaultBackend>::load(model_path, default_device())
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;

    let images: Vec<PathBuf> = if input.is_dir() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        paths.sort();
        paths
    } else if input.is_file() {
        vec![input.to_path_buf()]
    } else {
        bail!("Input not found: {}", input.display());
    };

    if images.is_empty() {
        println!("{} No images found in {}", "Note:".yellow(), input.display());
        return Ok(());
    }

    for path in &images {
        match predictor.predict_path(path) {
            Ok(result) => {
                println!(
                    "{} {} ({:.2}%)",
                    "Prediction:".green().bold(),
                    result.predicted_class.bold(),
                    result.confidence * 100.0
                );
                println!("{}", result.display());
            }
            Err(e @ (FundusError::ImageDecode { .. } | FundusError::Image(_))) => {
                println!("{} {}: {}", "Skipped:".red(), path.display(), e)
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Prediction failed for {}", path.display()))
            }
        }
    }
    Ok(())
}

fn cmd_inspect(model_path: &Path) -> Result<()> {
    let manifest = read_manifest(model_path)
        .with_context(|| format!("Failed to read artifact {}", model_path.display()))?;

    println!("{}", "Artifact manifest:".cyan().bold());
    println!("  Format version: {}", manifest.format_version);
    println!("  Written by:     fundus_classifier {}", manifest.crate_version);
    println!("  Created:        {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "  Model:          MobileNetV2 x{} + dense({}) -> {} classes",
        manifest.model.width_multiplier, manifest.model.hidden_units, manifest.model.num_classes
    );
    println!(
        "  Input:          {}x{} ({:?} resize, {:?} normalization)",
        manifest.recipe.image_width,
        manifest.recipe.image_height,
        manifest.recipe.resize_filter,
        manifest.recipe.normalization
    );
    print_labels(&manifest.labels);
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    println!();
    println!(
        "{} loss {:.4}, accuracy {:.2}% over {} samples",
        "Test results:".green().bold(),
        report.loss(),
        report.accuracy() * 100.0,
        report.metrics.total_samples
    );
    println!();
    println!("{}", "Classification report:".cyan().bold());
    println!("{}", report.classification_report());
    println!("{}", "Confusion matrix:".cyan().bold());
    println!("{}", report.metrics.confusion_matrix.display(&report.class_names));
}
