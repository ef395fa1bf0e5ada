//! エラー分類
//!
//! 起動時の前提条件エラーと学習失敗を型で区別します。
//! 呼び出し側では `anyhow::Error::downcast_ref` で判別できます。

use std::path::PathBuf;

/// 学習・起動時のエラー
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// 学習データフォルダが存在しない
    #[error("Dataset folder '{}' not found. It must contain one subfolder per class (Apple/, Banana/, ...)", .0.display())]
    MissingDataDir(PathBuf),

    /// 学習データフォルダにクラスまたは画像が無い
    #[error("No labeled images found in '{}'", .0.display())]
    EmptyDataset(PathBuf),

    /// 設定値が不正
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// モデルまたはクラスインデックスファイルが存在しない
    #[error("'{}' not found. Please train the model first using the `train` binary", .0.display())]
    MissingArtifact(PathBuf),

    /// クラスインデックスの内容が不正
    #[error("Invalid class index mapping: {0}")]
    InvalidMapping(String),

    /// モデルとクラスインデックスが一致しない
    #[error("Model artifact does not match class index mapping: {0}")]
    ArtifactMismatch(String),

    /// 学習データの画像が読めない
    #[error("Training image '{}' could not be read: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// 学習中の失敗
    #[error("Training failed: {0}")]
    Training(String),
}

/// 推論エラー
///
/// `Predictor::predict` はこのエラーを返し、パニックを外へ伝播させません。
#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    /// 画像のデコード失敗
    #[error("could not decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// 推論中の失敗
    #[error("inference failed: {0}")]
    Inference(String),

    /// 出力に対応するクラスが無い
    #[error("predicted class index {0} is out of range")]
    UnknownClass(usize),
}

/// パニックのペイロードからメッセージを取り出す
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
