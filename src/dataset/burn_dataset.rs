//! Burn batching for fundus images
//!
//! - `FundusBatcher`: turns preprocessed items into `[batch, 3, H, W]` tensors
//! - `FundusDataLoader`: lazy, restartable batch streams over a `FolderDataset`
//!
//! A training loader reshuffles every epoch and augments each image with its
//! own seed drawn from the epoch RNG, so a given `(seed, epoch)` always yields
//! the same batches even though decoding runs in parallel. An evaluation
//! loader keeps the dataset order and never augments.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::folder::{FolderDataset, ImageSample};
use crate::dataset::preprocess::{load_image, PreprocessRecipe};
use crate::utils::error::Result;

/// A single preprocessed item
#[derive(Clone, Debug)]
pub struct FundusItem {
    /// Flattened CHW float array `[3 * H * W]`
    pub image: Vec<f32>,
    pub label: usize,
}

/// Decode, optionally augment, then preprocess one sample
pub fn load_item(
    sample: &ImageSample,
    recipe: &PreprocessRecipe,
    augmentation: Option<(&Augmenter, u64)>,
) -> Result<FundusItem> {
    let img = load_image(&sample.path)?;
    let resized = recipe.resize(&img);
    let pixels = match augmentation {
        Some((augmenter, seed)) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            augmenter.augment(&resized, &mut rng)
        }
        None => resized,
    };
    Ok(FundusItem {
        image: recipe.normalize(&pixels),
        label: sample.label,
    })
}

/// A batch ready for the model
#[derive(Clone, Debug)]
pub struct FundusBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> FundusBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks preprocessed items into tensors
#[derive(Clone, Debug)]
pub struct FundusBatcher {
    height: usize,
    width: usize,
}

impl FundusBatcher {
    pub fn new(recipe: &PreprocessRecipe) -> Self {
        let [_, height, width] = recipe.input_shape();
        Self { height, width }
    }
}

impl<B: Backend> Batcher<B, FundusItem, FundusBatch<B>> for FundusBatcher {
    fn batch(&self, items: Vec<FundusItem>, device: &B::Device) -> FundusBatch<B> {
        let batch_size = items.len();
        let mut images_data = Vec::with_capacity(batch_size * 3 * self.height * self.width);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, self.height, self.width]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        FundusBatch { images, targets }
    }
}

/// Training or evaluation loader over one split
pub struct FundusDataLoader<B: Backend> {
    dataset: FolderDataset,
    recipe: PreprocessRecipe,
    batcher: FundusBatcher,
    batch_size: usize,
    /// Present for the training stream only
    shuffle: Option<(Augmenter, u64)>,
    device: B::Device,
}

impl<B: Backend> FundusDataLoader<B> {
    /// Shuffled, augmented stream that drops the final partial batch
    pub fn training(
        dataset: FolderDataset,
        recipe: PreprocessRecipe,
        augmenter: Augmenter,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Self {
        Self {
            batcher: FundusBatcher::new(&recipe),
            dataset,
            recipe,
            batch_size: batch_size.max(1),
            shuffle: Some((augmenter, seed)),
            device,
        }
    }

    /// Ordered, deterministic stream including the final partial batch
    pub fn evaluation(
        dataset: FolderDataset,
        recipe: PreprocessRecipe,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        Self {
            batcher: FundusBatcher::new(&recipe),
            dataset,
            recipe,
            batch_size: batch_size.max(1),
            shuffle: None,
            device,
        }
    }

    pub fn dataset(&self) -> &FolderDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of full batches, `floor(n / batch_size)`
    pub fn full_batches(&self) -> usize {
        self.dataset.samples().len() / self.batch_size
    }

    /// Number of batches one pass yields
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.samples().len();
        if self.shuffle.is_some() {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// One pass over the split. Training streams reshuffle per `epoch`.
    pub fn iter(&self, epoch: usize) -> BatchStream<'_, B> {
        let n = self.dataset.samples().len();
        let mut order: Vec<usize> = (0..n).collect();

        let seeds = self.shuffle.as_ref().map(|(_, seed)| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
            (0..n).map(|_| rng.gen::<u64>()).collect::<Vec<_>>()
        });

        if self.shuffle.is_some() {
            order.truncate(self.full_batches() * self.batch_size);
        }

        BatchStream {
            loader: self,
            order,
            seeds,
            pos: 0,
        }
    }

    fn load_batch(&self, indices: &[usize], seeds: Option<&[u64]>) -> Result<FundusBatch<B>> {
        let samples = self.dataset.samples();
        let augmenter = self.shuffle.as_ref().map(|(aug, _)| aug);

        let items = indices
            .par_iter()
            .enumerate()
            .map(|(i, &idx)| {
                let augmentation = augmenter.zip(seeds.map(|s| s[i]));
                load_item(&samples[idx], &self.recipe, augmentation)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.batcher.batch(items, &self.device))
    }
}

/// Lazy batch iterator for one pass
pub struct BatchStream<'a, B: Backend> {
    loader: &'a FundusDataLoader<B>,
    order: Vec<usize>,
    seeds: Option<Vec<u64>>,
    pos: usize,
}

impl<B: Backend> Iterator for BatchStream<'_, B> {
    type Item = Result<FundusBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.loader.batch_size).min(self.order.len());
        let indices = &self.order[self.pos..end];
        let seeds = self.seeds.as_deref().map(|s| &s[self.pos..end]);
        let batch = self.loader.load_batch(indices, seeds);
        self.pos = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.pos).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    type B = NdArray;

    /// Write `per_class` small PNGs for each class into `dir/<class>/`
    pub(crate) fn write_image_tree(dir: &Path, classes: &[&str], per_class: usize, size: u32) {
        for (c, class) in classes.iter().enumerate() {
            let class_dir = dir.join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let shade = (40 * c + 7 * i) as u8;
                let img = RgbImage::from_fn(size, size, |x, y| {
                    Rgb([shade, (x * 8) as u8, (y * 8) as u8])
                });
                img.save(class_dir.join(format!("{:02}.png", i))).unwrap();
            }
        }
    }

    fn recipe() -> PreprocessRecipe {
        PreprocessRecipe::square(8)
    }

    #[test]
    fn test_batcher_shapes() {
        let items = vec![
            FundusItem { image: vec![0.5; 3 * 64], label: 1 },
            FundusItem { image: vec![-0.5; 3 * 64], label: 3 },
        ];
        let batch: FundusBatch<B> = FundusBatcher::new(&recipe()).batch(items, &Default::default());

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.len(), 2);
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 3]);
    }

    #[test]
    fn test_evaluation_stream_keeps_order_and_partial_batch() {
        let dir = TempDir::new().unwrap();
        write_image_tree(dir.path(), &["a", "b"], 5, 12);
        let ds = FolderDataset::open(dir.path()).unwrap();
        let expected = ds.targets();

        let loader = FundusDataLoader::<B>::evaluation(ds, recipe(), 4, Default::default());
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.full_batches(), 2);

        let mut seen = Vec::new();
        for batch in loader.iter(0) {
            let batch = batch.unwrap();
            seen.extend(
                batch
                    .targets
                    .into_data()
                    .to_vec::<i64>()
                    .unwrap()
                    .into_iter()
                    .map(|t| t as usize),
            );
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_training_stream_drops_remainder_and_is_reproducible() {
        let dir = TempDir::new().unwrap();
        write_image_tree(dir.path(), &["a", "b"], 5, 12);

        let make = || {
            FundusDataLoader::<B>::training(
                FolderDataset::open(dir.path()).unwrap(),
                recipe(),
                Augmenter::new(AugmentationConfig::default()),
                3,
                11,
                Default::default(),
            )
        };
        let loader = make();
        assert_eq!(loader.num_batches(), 3);

        let collect = |l: &FundusDataLoader<B>, epoch| -> Vec<Vec<f32>> {
            l.iter(epoch)
                .map(|b| b.unwrap().images.into_data().to_vec::<f32>().unwrap())
                .collect()
        };

        let first = collect(&loader, 0);
        assert_eq!(first.len(), 3);
        assert_eq!(first, collect(&make(), 0));
        assert_ne!(first, collect(&loader, 1));
    }

    #[test]
    fn test_undecodable_file_fails_the_batch() {
        let dir = TempDir::new().unwrap();
        write_image_tree(dir.path(), &["a"], 2, 8);
        std::fs::write(dir.path().join("a").join("zz_broken.png"), b"not a png").unwrap();

        let ds = FolderDataset::open(dir.path()).unwrap();
        let loader = FundusDataLoader::<B>::evaluation(ds, recipe(), 8, Default::default());
        let result: Result<Vec<_>> = loader.iter(0).collect();
        assert!(matches!(
            result,
            Err(crate::utils::error::FundusError::ImageDecode { .. })
        ));
    }
}
