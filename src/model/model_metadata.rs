//! モデルメタデータの定義
//!
//! tar.gz形式のモデル成果物に `metadata.json` として同梱されます。
//! 推論側はここに記録された入力サイズとクラス順を使って検証・前処理を行います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// インデックス順のクラス名
    /// 例: ["Apple", "Banana", "Orange"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（CNNへの入力解像度、通常100x100）
    pub model_input_size: u32,

    /// 全結合層のユニット数
    pub hidden_units: u32,

    /// 学習時のドロップアウト率
    pub dropout: f64,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 分割・データ拡張に使ったシード
    #[serde(default)]
    pub seed: u64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model_input_size: u32,
        hidden_units: u32,
        dropout: f64,
        num_epochs: u32,
        seed: u64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            model_input_size,
            hidden_units,
            dropout,
            num_epochs,
            seed,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_training_time_as_rfc3339() {
        let metadata = ModelMetadata::new(vec!["A".into(), "B".into()], 100, 128, 0.5, 12, 42);

        assert_eq!(metadata.num_classes(), 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.trained_at).is_ok());
    }

    #[test]
    fn missing_seed_defaults_to_zero() {
        let json = r#"{
            "class_labels": ["Apple"],
            "model_input_size": 100,
            "hidden_units": 128,
            "dropout": 0.5,
            "num_epochs": 12,
            "trained_at": "2025-01-01T00:00:00+00:00"
        }"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert_eq!(metadata.seed, 0);
        assert_eq!(metadata.class_labels, ["Apple"]);
    }
}
