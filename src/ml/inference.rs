//! モデル推論機能
//!
//! モデル成果物とクラスインデックスを起動時に一度だけ読み込み、
//! 画像1枚ごとにクラス名と確信度を返します。

use anyhow::Result;
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::error::{panic_message, ClassifierError, PredictionError};
use crate::ml::{load_and_normalize_image_with_size, FruitClassifier, ModelConfig};
use crate::model::{load_model_with_metadata, ClassIndices, InferenceConfig};

/// 推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// 予測されたクラス名
    pub label: String,
    /// クラスインデックス
    pub class_index: usize,
    /// 確信度（0〜100のパーセント）
    pub confidence: f32,
}

/// 推論エンジン
///
/// 読み込み後は不変で、GUIはこれを所有して `predict` を呼び出します。
pub struct Predictor<B: Backend> {
    model: FruitClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// モデルとクラスインデックスを読み込んで推論エンジンを初期化
    ///
    /// どちらかのファイルが無い場合は `ClassifierError::MissingArtifact` で失敗します。
    pub fn load(model_path: &Path, class_indices_path: &Path, device: B::Device) -> Result<Self> {
        for path in [model_path, class_indices_path] {
            if !path.is_file() {
                return Err(ClassifierError::MissingArtifact(path.to_path_buf()).into());
            }
        }

        let class_indices = ClassIndices::load(class_indices_path)?;
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        let config = InferenceConfig::from_metadata(&metadata);
        config.check_against(&class_indices)?;

        let model_config = ModelConfig::new(config.num_classes())
            .with_image_size(config.model_input_size)
            .with_hidden_units(config.hidden_units);
        let model = model_config.init::<B>(&device)?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        config.print_info();
        Ok(Self::from_parts(model, config, device))
    }

    /// 読み込み済みのモデルから推論エンジンを組み立てる
    pub fn from_parts(model: FruitClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// 単一画像を分類
    ///
    /// 失敗は全て `PredictionError` として返し、パニックは外へ出しません。
    pub fn predict(&self, image_path: &Path) -> Result<Prediction, PredictionError> {
        let size = self.config.model_input_size;
        let image_data = load_and_normalize_image_with_size(image_path, size).map_err(|source| {
            PredictionError::Decode {
                path: image_path.to_path_buf(),
                source,
            }
        })?;

        let probabilities = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // Tensorに変換 [1, 3, size, size]
            let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
                .reshape([1, 3, size, size]);
            self.model
                .forward_probabilities(tensor)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
        }))
        .map_err(|payload| PredictionError::Inference(panic_message(payload.as_ref())))?
        .map_err(|e| PredictionError::Inference(format!("推論結果の取得エラー: {:?}", e)))?;

        let (class_index, max_probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| PredictionError::Inference("model produced no outputs".into()))?;

        if !max_probability.is_finite() {
            return Err(PredictionError::Inference(format!(
                "model produced a non-finite probability ({max_probability})"
            )));
        }

        let label = self
            .config
            .class_index_to_label(class_index)
            .ok_or(PredictionError::UnknownClass(class_index))?
            .to_string();

        Ok(Prediction {
            label,
            class_index,
            confidence: (max_probability * 100.0).clamp(0.0, 100.0),
        })
    }
}
