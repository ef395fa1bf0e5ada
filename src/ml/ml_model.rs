//! 機械学習モデルの共通定義
//!
//! 果物画像分類用のCNNモデルと画像の前処理を提供します。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};
use std::path::Path;

/// 入力画像サイズ（学習と推論で共有）
pub const IMAGE_SIZE: usize = 100;

/// 最終プーリング後の特徴マップサイズ
///
/// Conv (3x3, no padding) で2減少、Pool (2x2) で半分（切り捨て）を3回繰り返します。
/// 特徴マップが消える入力サイズでは `None` を返します。
pub fn feature_map_size(image_size: usize) -> Option<usize> {
    let mut size = image_size;
    for _ in 0..3 {
        if size < 4 {
            return None;
        }
        size = (size - 2) / 2;
    }
    (size > 0).then_some(size)
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 100)]
    pub image_size: usize,
    /// 全結合層のユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
}

impl ModelConfig {
    /// 設定の妥当性を確認し、Flatten後の特徴次元を返す
    pub fn flattened_features(&self) -> Result<usize> {
        if self.num_classes == 0 {
            anyhow::bail!("num_classes must be at least 1");
        }
        let feature_map = feature_map_size(self.image_size).ok_or_else(|| {
            anyhow::anyhow!("入力サイズが小さすぎます: {} (最小22x22が必要)", self.image_size)
        })?;
        Ok(128 * feature_map * feature_map)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FruitClassifier<B>> {
        let d = self.flattened_features()?;

        tracing::debug!(
            "[Model] 入力: {0}x{0}, Flatten後の特徴次元: {1}, FC1: {1} -> {2}, FC2: {2} -> {3}",
            self.image_size,
            d,
            self.hidden_units,
            self.num_classes
        );

        Ok(FruitClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            conv3: Conv2dConfig::new([64, 128], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(d, self.hidden_units).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 果物分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding, stride 1) + ReLU + MaxPool 2x2} x 3層 (32 -> 64 -> 128)
/// - Flatten
/// - FC: d -> hidden + ReLU
/// - Dropout
/// - FC: hidden -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct FruitClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    conv2: Conv2d<B>, // 32 -> 64
    conv3: Conv2d<B>, // 64 -> 128
    pool: MaxPool2d,

    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> FruitClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.pool.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv3.forward(x)));

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: ターゲットラベル [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 画像を読み込み、指定サイズの正方形RGBにリサイズ
pub fn load_rgb_resized(path: &Path, size: usize) -> image::ImageResult<RgbImage> {
    let img = image::open(path)?.to_rgb8();
    Ok(resize_rgb(&img, size))
}

/// 正方形RGBへリサイズ（最近傍補間）
pub fn resize_rgb(img: &RgbImage, size: usize) -> RgbImage {
    let size = size as u32;
    if img.dimensions() == (size, size) {
        img.clone()
    } else {
        image::imageops::resize(img, size, size, FilterType::Nearest)
    }
}

/// RGB画像を [0, 1] にスケールし (C, H, W) の順で平坦化
pub fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x, y);
                data.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    data
}

/// 画像を読み込んで正規化（サイズ指定版）
///
/// # 戻り値
/// - [0, 1] にスケールされたRGB画像データ (C, H, W) の順で平坦化
pub fn load_and_normalize_image_with_size(
    path: &Path,
    size: usize,
) -> image::ImageResult<Vec<f32>> {
    Ok(image_to_chw(&load_rgb_resized(path, size)?))
}
