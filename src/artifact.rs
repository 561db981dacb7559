//! Persisted model artifacts
//!
//! `save_artifacts` writes three files for one trained model:
//!
//! - `<stem>.json`: architecture summary and manifest, for humans
//! - `<stem>_weights.mpk`: weights only, named MessagePack record
//! - `<stem>_complete.bin`: self-contained artifact used for serving
//!
//! The combined file is laid out as:
//!
//! ```text
//! b"FNDSCLS1" | u32 LE format version | u64 LE manifest length | manifest JSON | weights
//! ```
//!
//! where the weights are a full-precision `BinBytesRecorder` record. The
//! manifest carries the label ordering and the preprocessing recipe, so a
//! served model always sees inputs prepared the way it was trained.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{ClassLabels, PreprocessRecipe};
use crate::model::{FundusClassifier, FundusClassifierConfig};
use crate::utils::error::{FundusError, Result, ResultExt};

/// Leading bytes of every combined artifact
pub const ARTIFACT_MAGIC: &[u8; 8] = b"FNDSCLS1";

/// Combined-artifact layout version written by this crate
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8 + 4 + 8;

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Everything needed to rebuild and feed a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    /// Version of the crate that wrote the artifact
    pub crate_version: String,
    pub created_at: DateTime<Utc>,
    pub model: FundusClassifierConfig,
    /// Output index `i` means `labels[i]`
    pub labels: ClassLabels,
    pub recipe: PreprocessRecipe,
}

impl ArtifactManifest {
    pub fn new(model: FundusClassifierConfig, labels: ClassLabels, recipe: PreprocessRecipe) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            crate_version: crate::VERSION.to_string(),
            created_at: Utc::now(),
            model,
            labels,
            recipe,
        }
    }

    /// Check the label list against the architecture
    pub fn validate(&self) -> Result<()> {
        ClassLabels::new(self.labels.names().to_vec())
            .map_err(|e| FundusError::Artifact(format!("Invalid label list: {}", e)))?;
        if self.labels.len() != self.model.num_classes {
            return Err(FundusError::Artifact(format!(
                "Manifest lists {} labels but the model has {} outputs",
                self.labels.len(),
                self.model.num_classes
            )));
        }
        Ok(())
    }
}

/// Human-readable architecture summary stored in `<stem>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureSummary {
    pub backbone: String,
    pub width_multiplier: f64,
    pub feature_channels: usize,
    pub hidden_units: usize,
    pub dropout_rate: f64,
    pub num_classes: usize,
    /// `[channels, height, width]`
    pub input_shape: [usize; 3],
    pub trainable_params: usize,
    pub frozen_params: usize,
}

#[derive(Serialize)]
struct ModelDescription<'a> {
    architecture: ArchitectureSummary,
    manifest: &'a ArtifactManifest,
}

/// Files written by `save_artifacts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub description: PathBuf,
    pub weights: PathBuf,
    pub complete: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            description: dir.join(format!("{}.json", stem)),
            weights: dir.join(format!("{}_weights.mpk", stem)),
            complete: dir.join(format!("{}_complete.bin", stem)),
        }
    }
}

/// Write the description, weights-only and combined files for `model`
pub fn save_artifacts<B: Backend>(
    model: &FundusClassifier<B>,
    manifest: &ArtifactManifest,
    dir: &Path,
    stem: &str,
) -> Result<ArtifactPaths> {
    manifest.validate()?;
    if model.num_classes() != manifest.model.num_classes {
        return Err(FundusError::Artifact(format!(
            "Model has {} outputs but the manifest describes {}",
            model.num_classes(),
            manifest.model.num_classes
        )));
    }

    std::fs::create_dir_all(dir)?;
    let paths = ArtifactPaths::new(dir, stem);

    let description = ModelDescription {
        architecture: ArchitectureSummary {
            backbone: "MobileNetV2".to_string(),
            width_multiplier: manifest.model.width_multiplier,
            feature_channels: manifest.model.backbone().out_channels(),
            hidden_units: manifest.model.hidden_units,
            dropout_rate: manifest.model.dropout_rate,
            num_classes: manifest.model.num_classes,
            input_shape: manifest.recipe.input_shape(),
            trainable_params: model.head_param_count(),
            frozen_params: model.backbone_param_count(),
        },
        manifest,
    };
    std::fs::write(&paths.description, serde_json::to_string_pretty(&description)?)?;

    model
        .clone()
        .save_file(
            paths.weights.clone(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| FundusError::Record(format!("Failed to save weights: {:?}", e)))?;

    let bytes = encode_complete(model, manifest)?;
    std::fs::write(&paths.complete, bytes)?;

    info!(
        "Saved model artifacts to {:?} ({}, {}, {})",
        dir,
        file_name(&paths.description),
        file_name(&paths.weights),
        file_name(&paths.complete)
    );
    Ok(paths)
}

/// Serialize the combined artifact into memory
pub fn encode_complete<B: Backend>(
    model: &FundusClassifier<B>,
    manifest: &ArtifactManifest,
) -> Result<Vec<u8>> {
    let manifest_json = serde_json::to_vec(manifest)?;
    let weights = Recorder::<B>::record(&WeightsRecorder::new(), model.clone().into_record(), ())
        .map_err(|e| FundusError::Record(format!("Failed to encode weights: {:?}", e)))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + manifest_json.len() + weights.len());
    bytes.extend_from_slice(ARTIFACT_MAGIC);
    bytes.extend_from_slice(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(manifest_json.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&manifest_json);
    bytes.extend_from_slice(&weights);
    Ok(bytes)
}

/// Load a model and its manifest from a combined artifact file
pub fn load_complete<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(FundusClassifier<B>, ArtifactManifest)> {
    let bytes = std::fs::read(path)
        .artifact_context(|| format!("Failed to read artifact {:?}", path))?;
    let loaded = decode_complete(&bytes, device)?;
    info!(
        "Loaded artifact {:?}: {} classes [{}]",
        path,
        loaded.1.labels.len(),
        loaded.1.labels
    );
    Ok(loaded)
}

/// Read only the manifest of a combined artifact file
pub fn read_manifest(path: &Path) -> Result<ArtifactManifest> {
    let bytes = std::fs::read(path)
        .artifact_context(|| format!("Failed to read artifact {:?}", path))?;
    split_complete(&bytes).map(|(manifest, _)| manifest)
}

/// Rebuild a model from combined artifact bytes
pub fn decode_complete<B: Backend>(
    bytes: &[u8],
    device: &B::Device,
) -> Result<(FundusClassifier<B>, ArtifactManifest)> {
    let (manifest, weights) = split_complete(bytes)?;

    let record = Recorder::<B>::load(&WeightsRecorder::new(), weights.to_vec(), device)
        .artifact_context(|| "Failed to decode weights".to_string())?;

    // the skeleton never loads pretrained files, the record replaces every weight
    let backbone = manifest.model.backbone().init(device);
    let model = manifest
        .model
        .with_backbone(backbone, device)
        .load_record(record);

    Ok((model, manifest))
}

/// Validate the header and split the manifest from the weight bytes
fn split_complete(bytes: &[u8]) -> Result<(ArtifactManifest, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(FundusError::Artifact(format!(
            "Truncated artifact: {} bytes, header needs {}",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if &bytes[..8] != ARTIFACT_MAGIC {
        return Err(FundusError::Artifact(
            "Not a fundus classifier artifact (bad magic)".to_string(),
        ));
    }

    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != ARTIFACT_FORMAT_VERSION {
        return Err(FundusError::Artifact(format!(
            "Unsupported artifact format version {} (supported: {})",
            version, ARTIFACT_FORMAT_VERSION
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..HEADER_LEN]);
    let manifest_len = u64::from_le_bytes(len_bytes);
    let manifest_end = usize::try_from(manifest_len)
        .ok()
        .and_then(|len| HEADER_LEN.checked_add(len))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            FundusError::Artifact(format!(
                "Truncated artifact: manifest of {} bytes does not fit in {} bytes",
                manifest_len,
                bytes.len()
            ))
        })?;

    let manifest: ArtifactManifest = serde_json::from_slice(&bytes[HEADER_LEN..manifest_end])
        .artifact_context(|| "Malformed artifact manifest".to_string())?;
    manifest.validate()?;

    let weights = &bytes[manifest_end..];
    if weights.is_empty() {
        return Err(FundusError::Artifact(
            "Truncated artifact: no weight data".to_string(),
        ));
    }
    Ok((manifest, weights))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type B = NdArray;

    fn labels() -> ClassLabels {
        ClassLabels::new(vec!["a".into(), "b".into(), "c".into()]).unwrap()
    }

    fn setup() -> (FundusClassifier<B>, ArtifactManifest) {
        let config = FundusClassifierConfig::new()
            .with_num_classes(3)
            .with_width_multiplier(0.35)
            .with_hidden_units(8);
        let model = config.init::<B>(&Default::default()).unwrap();
        let manifest = ArtifactManifest::new(config, labels(), PreprocessRecipe::square(32));
        (model, manifest)
    }

    fn encode_with_manifest(manifest_json: &[u8], weights: &[u8]) -> Vec<u8> {
        let mut bytes = ARTIFACT_MAGIC.to_vec();
        bytes.extend_from_slice(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(manifest_json.len() as u64).to_le_bytes());
        bytes.extend_from_slice(manifest_json);
        bytes.extend_from_slice(weights);
        bytes
    }

    #[test]
    fn test_roundtrip_predictions_match() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let (model, manifest) = setup();

        let paths = save_artifacts(&model, &manifest, dir.path(), "fundus").unwrap();
        assert!(paths.description.exists());
        assert!(paths.weights.exists());
        assert!(paths.complete.exists());

        let (loaded, loaded_manifest) = load_complete::<B>(&paths.complete, &device).unwrap();
        assert_eq!(loaded_manifest.labels, manifest.labels);
        assert_eq!(loaded_manifest.recipe, manifest.recipe);

        let input = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Uniform(-1.0, 1.0), &device);
        let before = model.forward_softmax(input.clone()).into_data().to_vec::<f32>().unwrap();
        let after = loaded.forward_softmax(input).into_data().to_vec::<f32>().unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_description_json_lists_architecture() {
        let dir = TempDir::new().unwrap();
        let (model, manifest) = setup();
        let paths = save_artifacts(&model, &manifest, dir.path(), "m").unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.description).unwrap()).unwrap();
        assert_eq!(json["architecture"]["backbone"], "MobileNetV2");
        assert_eq!(json["architecture"]["num_classes"], 3);
        assert_eq!(json["manifest"]["labels"][1], "b");
    }

    #[test]
    fn test_read_manifest_only() {
        let dir = TempDir::new().unwrap();
        let (model, manifest) = setup();
        let paths = save_artifacts(&model, &manifest, dir.path(), "m").unwrap();

        let read = read_manifest(&paths.complete).unwrap();
        assert_eq!(read.format_version, ARTIFACT_FORMAT_VERSION);
        assert_eq!(read.labels.names(), labels().names());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let (model, manifest) = setup();
        let mut bytes = encode_complete(&model, &manifest).unwrap();
        bytes[0] = b'X';
        let result = decode_complete::<B>(&bytes, &Default::default());
        assert!(matches!(result, Err(FundusError::Artifact(msg)) if msg.contains("magic")));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let (model, manifest) = setup();
        let mut bytes = encode_complete(&model, &manifest).unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        let result = decode_complete::<B>(&bytes, &Default::default());
        assert!(matches!(result, Err(FundusError::Artifact(msg)) if msg.contains("version 99")));
    }

    #[test]
    fn test_truncated_files_are_rejected() {
        let (model, manifest) = setup();
        let bytes = encode_complete(&model, &manifest).unwrap();
        let manifest_len = serde_json::to_vec(&manifest).unwrap().len();

        for cut in [4, HEADER_LEN + 10, HEADER_LEN + manifest_len] {
            let result = decode_complete::<B>(&bytes[..cut], &Default::default());
            assert!(
                matches!(result, Err(FundusError::Artifact(_))),
                "cut at {} was accepted",
                cut
            );
        }
    }

    #[test]
    fn test_malformed_manifest_is_rejected() {
        let bytes = encode_with_manifest(b"{not json", &[1, 2, 3]);
        let result = decode_complete::<B>(&bytes, &Default::default());
        assert!(matches!(result, Err(FundusError::Artifact(msg)) if msg.contains("Malformed")));
    }

    #[test]
    fn test_inconsistent_labels_are_rejected() {
        let (_, manifest) = setup();
        let mut json = serde_json::to_value(&manifest).unwrap();

        json["labels"] = serde_json::json!(["a", "b"]);
        let bytes = encode_with_manifest(&serde_json::to_vec(&json).unwrap(), &[0]);
        assert!(matches!(
            decode_complete::<B>(&bytes, &Default::default()),
            Err(FundusError::Artifact(_))
        ));

        json["labels"] = serde_json::json!(["a", "b", "a"]);
        let bytes = encode_with_manifest(&serde_json::to_vec(&json).unwrap(), &[0]);
        assert!(matches!(
            decode_complete::<B>(&bytes, &Default::default()),
            Err(FundusError::Artifact(msg)) if msg.contains("Duplicate")
        ));

        json["labels"] = serde_json::json!([]);
        let bytes = encode_with_manifest(&serde_json::to_vec(&json).unwrap(), &[0]);
        assert!(matches!(
            decode_complete::<B>(&bytes, &Default::default()),
            Err(FundusError::Artifact(_))
        ));
    }

    #[test]
    fn test_save_rejects_label_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let (model, mut manifest) = setup();
        manifest.labels = ClassLabels::new(vec!["only".into()]).unwrap();
        let result = save_artifacts(&model, &manifest, dir.path(), "m");
        assert!(matches!(result, Err(FundusError::Artifact(_))));
        assert!(!ArtifactPaths::new(dir.path(), "m").complete.exists());
    }
}
