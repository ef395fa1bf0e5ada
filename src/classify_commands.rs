//! 画像選択時の処理
//!
//! 選択された画像のサムネイル作成と推論をまとめ、結果を1つの `Outcome` として返します。
//! 表示内容は `render` だけが決めるため、GUIなしでテストできます。

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use image::imageops::FilterType;
use std::path::Path;

use crate::ml::{Prediction, Predictor};

/// 表示用サムネイル（RGBA8）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// 画像1枚の処理結果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 推論成功
    Prediction(Prediction),
    /// 推論側が報告したエラー（画面内に表示）
    PredictorError(String),
    /// 画像の読み込み・表示自体の失敗（ダイアログで表示）
    PresentationError(String),
}

/// 結果表示の色合い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTone {
    Success,
    Failure,
}

/// 表示内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultView {
    /// 結果ラベルを書き換える
    Inline { text: String, tone: ResultTone },
    /// モーダルダイアログを出す（結果ラベルはそのまま）
    Modal { title: String, message: String },
}

/// ファイル選択1回分の結果
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// 表示に失敗した場合は `None`
    pub thumbnail: Option<Thumbnail>,
    pub outcome: Outcome,
}

/// 画像を読み込み、正方形のサムネイルにリサイズ
pub fn load_thumbnail(path: &Path, size: u32) -> Result<Thumbnail> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let rgba = img.resize_exact(size, size, FilterType::Triangle).to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Thumbnail {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

/// 選択された画像を表示用に読み込み、推論する
///
/// サムネイルが作れない場合は推論せずに `PresentationError` を返します。
pub fn classify_file<B: Backend>(
    predictor: &Predictor<B>,
    path: &Path,
    thumbnail_size: u32,
) -> Selection {
    let thumbnail = match load_thumbnail(path, thumbnail_size) {
        Ok(thumbnail) => thumbnail,
        Err(e) => {
            tracing::warn!("画像を表示できません: {:#}", e);
            return Selection {
                thumbnail: None,
                outcome: Outcome::PresentationError(format!("{e:#}")),
            };
        }
    };

    let outcome = match predictor.predict(path) {
        Ok(prediction) => {
            tracing::info!(
                "{} -> {} ({:.2}%)",
                path.display(),
                prediction.label,
                prediction.confidence
            );
            Outcome::Prediction(prediction)
        }
        Err(e) => {
            tracing::warn!("推論エラー {}: {}", path.display(), e);
            Outcome::PredictorError(e.to_string())
        }
    };

    Selection {
        thumbnail: Some(thumbnail),
        outcome,
    }
}

/// 結果から表示内容を決める
pub fn render(outcome: &Outcome) -> ResultView {
    match outcome {
        Outcome::Prediction(prediction) => ResultView::Inline {
            text: format!("Prediction: {} ({:.2}%)", prediction.label, prediction.confidence),
            tone: ResultTone::Success,
        },
        Outcome::PredictorError(message) => ResultView::Inline {
            text: format!("Error: {message}"),
            tone: ResultTone::Failure,
        },
        Outcome::PresentationError(message) => ResultView::Modal {
            title: "Error".to_string(),
            message: format!("Could not process image: {message}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelConfig;
    use crate::model::InferenceConfig;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    fn predictor() -> Predictor<NdArray<f32>> {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2)
            .with_image_size(30)
            .with_hidden_units(8)
            .init::<NdArray<f32>>(&device)
            .unwrap();
        let config = InferenceConfig {
            class_labels: vec!["Apple".into(), "Banana".into()],
            model_input_size: 30,
            hidden_units: 8,
        };
        Predictor::from_parts(model, config, device)
    }

    #[test]
    fn renders_prediction_with_two_decimals() {
        let view = render(&Outcome::Prediction(Prediction {
            label: "Apple".into(),
            class_index: 0,
            confidence: 87.456,
        }));
        assert_eq!(
            view,
            ResultView::Inline {
                text: "Prediction: Apple (87.46%)".into(),
                tone: ResultTone::Success,
            }
        );
    }

    #[test]
    fn renders_errors_on_separate_channels() {
        assert_eq!(
            render(&Outcome::PredictorError("bad pixels".into())),
            ResultView::Inline {
                text: "Error: bad pixels".into(),
                tone: ResultTone::Failure,
            }
        );
        assert_eq!(
            render(&Outcome::PresentationError("truncated file".into())),
            ResultView::Modal {
                title: "Error".into(),
                message: "Could not process image: truncated file".into(),
            }
        );
    }

    #[test]
    fn thumbnail_is_fixed_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbImage::from_pixel(600, 120, Rgb([10, 200, 30])).save(&path).unwrap();

        let thumbnail = load_thumbnail(&path, 250).unwrap();
        assert_eq!((thumbnail.width, thumbnail.height), (250, 250));
        assert_eq!(thumbnail.rgba.len(), 250 * 250 * 4);
    }

    #[test]
    fn selecting_an_image_produces_thumbnail_and_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fruit.jpg");
        RgbImage::from_pixel(80, 80, Rgb([220, 30, 30])).save(&path).unwrap();

        let selection = classify_file(&predictor(), &path, 250);
        assert!(selection.thumbnail.is_some());
        match selection.outcome {
            Outcome::Prediction(p) => {
                assert!(p.label == "Apple" || p.label == "Banana");
                assert!((0.0..=100.0).contains(&p.confidence));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn undecodable_file_is_a_presentation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let selection = classify_file(&predictor(), &path, 250);
        assert!(selection.thumbnail.is_none());
        assert!(matches!(selection.outcome, Outcome::PresentationError(ref m) if !m.is_empty()));
    }
}
