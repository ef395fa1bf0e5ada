//! モデル学習
//!
//! クラスごとのサブフォルダを持つディレクトリから学習データを読み込み、
//! クラスインデックスを書き出してからCNNを学習し、成果物を保存します。

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{panic_message, ClassifierError};
use crate::ml::augment::Augmenter;
use crate::ml::{image_to_chw, load_rgb_resized, FruitClassifier, ModelConfig};
use crate::model::{save_model_with_metadata, AppConfig, ClassIndices, ModelMetadata};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct FruitDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
    // データセット分割用のインデックス範囲
    start_idx: usize,
    end_idx: usize,
}

impl FruitDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// サブフォルダ名を名前順に並べたものがクラス順になります。
    /// 画像は png / jpg / jpeg（大文字小文字を区別しない）のみ対象です。
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        if !data_dir.is_dir() {
            return Err(ClassifierError::MissingDataDir(data_dir.to_path_buf()).into());
        }

        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(data_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                let class_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {:?}", path))?
                    .to_string();
                class_dirs.push((class_name, path));
            }
        }
        class_dirs.sort();

        let mut samples = Vec::new();
        let mut class_names = Vec::with_capacity(class_dirs.len());
        for (class_id, (class_name, class_dir)) in class_dirs.into_iter().enumerate() {
            let mut images: Vec<PathBuf> = std::fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            images.sort();
            for path in &images {
                check_readable(path)?;
            }

            tracing::info!("  Class {}: {} ({} images)", class_id, class_name, images.len());
            samples.extend(images.into_iter().map(|path| (path, class_id)));
            class_names.push(class_name);
        }

        if class_names.is_empty() || samples.is_empty() {
            return Err(ClassifierError::EmptyDataset(data_dir.to_path_buf()).into());
        }

        tracing::info!(
            "Found {} images belonging to {} classes",
            samples.len(),
            class_names.len()
        );

        let len = samples.len();
        Ok(Self {
            samples,
            class_names,
            start_idx: 0,
            end_idx: len,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// データセットを学習用と検証用に分割（インデックス範囲のみ）
    ///
    /// 同じシードなら常に同じ分割になります。
    pub fn split(self, train_ratio: f32, seed: u64) -> (Self, Self) {
        let mut samples = self.samples;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let total_len = samples.len();
        let train_len = ((total_len as f32 * train_ratio) as usize).min(total_len);

        // 学習用データセット（前半のインデックス範囲）
        let train_dataset = Self {
            samples: samples.clone(),
            class_names: self.class_names.clone(),
            start_idx: 0,
            end_idx: train_len,
        };

        // 検証用データセット（後半のインデックス範囲）
        let val_dataset = Self {
            samples,
            class_names: self.class_names,
            start_idx: train_len,
            end_idx: total_len,
        };

        (train_dataset, val_dataset)
    }
}

/// ヘッダを読んで画像として開けるか確認
fn check_readable(path: &Path) -> Result<(), ClassifierError> {
    image::image_dimensions(path)
        .map(|_| ())
        .map_err(|source| ClassifierError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct FruitItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<FruitItem> for FruitDataset {
    fn get(&self, index: usize) -> Option<FruitItem> {
        // インデックス範囲内のデータのみ返す
        let actual_index = self.start_idx + index;
        if actual_index >= self.end_idx {
            return None;
        }

        let (path, label) = self.samples.get(actual_index)?;
        Some(FruitItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.end_idx - self.start_idx
    }
}

/// バッチャー
///
/// `augmenter` がある場合（学習用）はリサイズ後にランダム変換を適用します。
#[derive(Clone)]
pub struct FruitBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    augmenter: Option<Arc<Augmenter>>,
}

impl<B: Backend> FruitBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self {
            device,
            image_size,
            augmenter: None,
        }
    }

    pub fn with_augmenter(mut self, augmenter: Arc<Augmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    fn load_item(&self, item: &FruitItem) -> image::ImageResult<Vec<f32>> {
        let img = load_rgb_resized(&item.path, self.image_size)?;
        let img = match &self.augmenter {
            Some(augmenter) => augmenter.augment(&img),
            None => img,
        };
        Ok(image_to_chw(&img))
    }
}

impl<B: Backend> Batcher<B, FruitItem, FruitBatch<B>> for FruitBatcher<B> {
    fn batch(&self, items: Vec<FruitItem>, _device: &B::Device) -> FruitBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let pixels_per_image = 3 * image_size * image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * pixels_per_image);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            // Batcherはエラーを返せないため、train_modelのcatch_unwindで学習失敗として扱う
            match self.load_item(&item) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => panic!("画像読み込み失敗 {}: {}", item.path.display(), e),
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        FruitBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FruitBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// 1エポック分の指標
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// 検証データが空の場合は `None`
    pub valid_loss: Option<f64>,
    pub valid_accuracy: Option<f64>,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub class_indices: ClassIndices,
    pub epochs: Vec<EpochMetrics>,
    pub model_path: PathBuf,
    pub class_indices_path: PathBuf,
    pub num_train_samples: usize,
    pub num_valid_samples: usize,
}

#[derive(Default)]
struct MetricAccumulator {
    loss_sum: f64,
    correct: i64,
    count: usize,
}

impl MetricAccumulator {
    fn update<B: Backend>(&mut self, loss: Tensor<B, 1>, output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        let [batch_size, _] = output.dims();
        let loss = loss.into_scalar().elem::<f64>();
        let predicted = output.argmax(1).reshape([batch_size]);
        let correct = predicted.equal(targets).int().sum().into_scalar().elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct;
        self.count += batch_size;
    }

    fn finish(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            (
                self.loss_sum / self.count as f64,
                100.0 * self.correct as f64 / self.count as f64,
            )
        })
    }
}

/// モデル学習を実行
///
/// 手順:
/// 1. 学習データフォルダの存在確認（無ければ何も書き出さずに失敗）
/// 2. データ読み込みとクラスインデックスの保存
/// 3. 学習/検証データへの分割と学習
/// 4. 成功した場合のみモデルを保存
pub fn train_model<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<TrainingReport> {
    let data_dir = &config.training.data_dir;
    if !data_dir.is_dir() {
        return Err(ClassifierError::MissingDataDir(data_dir.clone()).into());
    }
    config.validate()?;

    let dataset = FruitDataset::from_directory(data_dir)?;

    // 学習失敗に関わらずクラスインデックスは先に保存する
    let class_indices = ClassIndices::from_class_names(dataset.class_names())?;
    class_indices.save(&config.model.class_indices_path)?;
    tracing::info!("Saved class indices: {}", class_indices);

    let class_labels = dataset.class_names().to_vec();
    let num_classes = dataset.num_classes();

    // 学習/検証データに分割
    let (dataset_train, dataset_val) =
        dataset.split(config.training.train_ratio, config.training.seed);
    let num_train_samples = dataset_train.len();
    let num_valid_samples = dataset_val.len();
    tracing::info!("学習データ: {} 枚, 検証データ: {} 枚", num_train_samples, num_valid_samples);

    let model_config = ModelConfig::new(num_classes)
        .with_dropout(config.model.dropout)
        .with_image_size(config.model.image_size)
        .with_hidden_units(config.model.hidden_units);
    let model = model_config.init::<B>(&device)?;
    tracing::info!(
        "モデル設定: {} クラス, 入力サイズ: {}x{}, パラメータ数: {}",
        num_classes,
        model_config.image_size,
        model_config.image_size,
        model.num_params()
    );

    let image_size = config.model.image_size;
    let augmenter = Arc::new(Augmenter::new(config.augmentation.clone(), config.training.seed));
    let batcher_train = FruitBatcher::<B>::new(device.clone(), image_size).with_augmenter(augmenter);
    let batcher_val = FruitBatcher::<B::InnerBackend>::new(device.clone(), image_size);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.training.batch_size)
        .shuffle(config.training.seed)
        .num_workers(config.training.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(config.training.batch_size)
        .num_workers(config.training.num_workers)
        .build(dataset_val);

    let num_epochs = config.training.num_epochs;
    let learning_rate = config.training.learning_rate;
    tracing::info!(
        "学習を開始します (エポック数: {}, バッチサイズ: {}, 学習率: {})",
        num_epochs,
        config.training.batch_size,
        learning_rate
    );

    // ライブラリ内部のパニックは学習失敗として扱う
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut model = model;
        let mut optim = AdamConfig::new().init::<B, FruitClassifier<B>>();
        let mut history = Vec::with_capacity(num_epochs);

        for epoch in 1..=num_epochs {
            let started = Instant::now();
            let mut train_metrics = MetricAccumulator::default();

            for batch in dataloader_train.iter() {
                let item = model.forward_classification(batch.images, batch.targets);
                train_metrics.update(item.loss.clone().inner(), item.output.inner(), item.targets.inner());

                let grads = GradientsParams::from_grads(item.loss.backward(), &model);
                model = optim.step(learning_rate, model, grads);
            }

            let valid_model = model.valid();
            let mut valid_metrics = MetricAccumulator::default();
            for batch in dataloader_val.iter() {
                let item = valid_model.forward_classification(batch.images, batch.targets);
                valid_metrics.update(item.loss, item.output, item.targets);
            }

            let (train_loss, train_accuracy) = train_metrics.finish().unwrap_or((f64::NAN, 0.0));
            let valid = valid_metrics.finish();
            let metrics = EpochMetrics {
                epoch,
                train_loss,
                train_accuracy,
                valid_loss: valid.map(|(loss, _)| loss),
                valid_accuracy: valid.map(|(_, acc)| acc),
            };
            log_epoch(&metrics, num_epochs, started.elapsed().as_secs_f64());
            history.push(metrics);
        }

        (model.valid(), history)
    }));

    let (trained_model, history) = outcome.map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!("Training failed: {}", message);
        ClassifierError::Training(message)
    })?;

    // モデルを保存
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = Recorder::<B::InnerBackend>::record(&recorder, trained_model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        class_labels,
        image_size as u32,
        config.model.hidden_units as u32,
        config.model.dropout,
        num_epochs as u32,
        config.training.seed,
    );
    let model_path = save_model_with_metadata(&config.model.model_path, &metadata, &model_binary)?;
    tracing::info!(
        "Model saved as {} ({:.2} MB)",
        model_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(TrainingReport {
        class_indices,
        epochs: history,
        model_path,
        class_indices_path: config.model.class_indices_path.clone(),
        num_train_samples,
        num_valid_samples,
    })
}

fn log_epoch(metrics: &EpochMetrics, num_epochs: usize, elapsed_secs: f64) {
    match (metrics.valid_loss, metrics.valid_accuracy) {
        (Some(valid_loss), Some(valid_accuracy)) => tracing::info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.2}% - val_loss: {:.4} - val_accuracy: {:.2}% ({:.1}s)",
            metrics.epoch,
            num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            valid_loss,
            valid_accuracy,
            elapsed_secs
        ),
        _ => tracing::info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.2}% ({:.1}s)",
            metrics.epoch,
            num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            elapsed_secs
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(12, 8, Rgb(color)).save(path).unwrap();
    }

    fn make_dataset_dir(root: &Path) {
        for (class, count) in [("Banana", 3), ("Apple", 2)] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                write_image(&dir.join(format!("{i}.png")), [200, 10, 10]);
            }
        }
        std::fs::write(root.join("Apple").join("notes.txt"), "not an image").unwrap();
        std::fs::write(root.join("README.md"), "top-level files are ignored").unwrap();
    }

    #[test]
    fn classes_are_sorted_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset_dir(dir.path());

        let dataset = FruitDataset::from_directory(dir.path()).unwrap();
        assert_eq!(dataset.class_names(), ["Apple", "Banana"]);
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.get(0).unwrap().label, 0);
        assert_eq!(dataset.get(4).unwrap().label, 1);
        assert!(dataset.get(5).is_none());
    }

    #[test]
    fn uppercase_extensions_are_images() {
        let dir = tempfile::tempdir().unwrap();
        let class_dir = dir.path().join("Pear");
        std::fs::create_dir_all(&class_dir).unwrap();
        write_image(&class_dir.join("a.PNG"), [0, 0, 0]);

        assert_eq!(FruitDataset::from_directory(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn missing_or_empty_directories_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FruitDataset::from_directory(&dir.path().join("fruits")).unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::MissingDataDir(_))
        ));

        std::fs::create_dir_all(dir.path().join("Apple")).unwrap();
        let empty = FruitDataset::from_directory(dir.path()).unwrap_err();
        assert!(matches!(
            empty.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::EmptyDataset(_))
        ));
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset_dir(dir.path());
        let dataset = FruitDataset::from_directory(dir.path()).unwrap();

        let (train_a, valid_a) = dataset.clone().split(0.8, 7);
        let (train_b, _) = dataset.split(0.8, 7);
        assert_eq!(train_a.len(), 4);
        assert_eq!(valid_a.len(), 1);

        let paths = |d: &FruitDataset| (0..d.len()).map(|i| d.get(i).unwrap().path).collect::<Vec<_>>();
        assert_eq!(paths(&train_a), paths(&train_b));
        assert!(!paths(&train_a).contains(&paths(&valid_a)[0]));
    }

    #[test]
    fn batcher_stacks_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let white = dir.path().join("white.png");
        let black = dir.path().join("black.png");
        write_image(&white, [255, 255, 255]);
        write_image(&black, [0, 0, 0]);

        let batcher = FruitBatcher::<NdArray<f32>>::new(NdArrayDevice::Cpu, 24);
        let items = vec![
            FruitItem { path: white, label: 1 },
            FruitItem { path: black, label: 0 },
        ];
        let batch = batcher.batch(items, &NdArrayDevice::Cpu);

        assert_eq!(batch.images.dims(), [2, 3, 24, 24]);
        let sums = batch.images.sum_dim(1).sum_dim(2).sum_dim(3).into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert!((sums[0] - 3.0 * 24.0 * 24.0).abs() < 1e-2);
        assert_eq!(sums[1], 0.0);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    #[should_panic(expected = "画像読み込み失敗")]
    fn batcher_refuses_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        let batcher = FruitBatcher::<NdArray<f32>>::new(NdArrayDevice::Cpu, 24);
        let items = vec![FruitItem { path: dir.path().join("missing.png"), label: 0 }];
        batcher.batch(items, &NdArrayDevice::Cpu);
    }

    #[test]
    fn undecodable_file_fails_dataset_scan() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset_dir(dir.path());
        let bad = dir.path().join("Banana").join("bad.jpg");
        std::fs::write(&bad, "garbage").unwrap();

        let err = FruitDataset::from_directory(dir.path()).unwrap_err();
        match err.downcast_ref::<ClassifierError>() {
            Some(ClassifierError::UnreadableImage { path, .. }) => assert_eq!(path, &bad),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
