//! 果物画像分類器
//!
//! - `ml`: CNNモデル、学習、推論
//! - `model`: 設定、クラスインデックス、モデル成果物の保存と読み込み
//! - `classify_commands` / `app`: デスクトップGUI

pub mod error;
pub mod logging;
pub mod model;
pub mod ml;
pub mod classify_commands;
pub mod app;

pub use error::{ClassifierError, PredictionError};
