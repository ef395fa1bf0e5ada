//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、成果物のパス、学習・データ拡張・GUIの設定を
//! JSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ClassifierError;
use crate::ml::{feature_map_size, IMAGE_SIZE};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// モデル成果物（tar.gz）のパス
    pub model_path: PathBuf,
    /// クラスインデックス（JSON）のパス
    pub class_indices_path: PathBuf,
    /// 入力画像サイズ（正方形）。学習と推論で共有される
    pub image_size: usize,
    /// 全結合層のユニット数
    pub hidden_units: usize,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("fruit_classifier.tar.gz"),
            class_indices_path: PathBuf::from("class_indices.json"),
            image_size: IMAGE_SIZE,
            hidden_units: 128,
            dropout: 0.5,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// 学習データのルート（クラスごとのサブフォルダを含む）
    pub data_dir: PathBuf,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（分割・シャッフル・データ拡張）
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("fruits"),
            num_epochs: 12,
            batch_size: 32,
            num_workers: 0,
            learning_rate: 1e-3,
            seed: 42,
            train_ratio: 0.8,
        }
    }
}

/// データ拡張設定
///
/// 角度は度単位、シフトとズームは画像サイズに対する割合です。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationSettings {
    pub enabled: bool,
    pub rotation_range: f32,
    pub width_shift_range: f32,
    pub height_shift_range: f32,
    pub shear_range: f32,
    pub zoom_range: f32,
    pub horizontal_flip: bool,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_range: 20.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

/// GUI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiSettings {
    /// サムネイルの一辺（ピクセル）
    pub thumbnail_size: u32,
    pub window_width: f32,
    pub window_height: f32,
}

impl Default for GuiSettings {
    fn default() -> Self {
        Self {
            thumbnail_size: 250,
            window_width: 500.0,
            window_height: 500.0,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// データ拡張設定
    pub augmentation: AugmentationSettings,
    /// GUI設定
    pub gui: GuiSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 学習前に設定値を検証する
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let training = &self.training;
        if training.num_epochs == 0 {
            return Err(ClassifierError::InvalidConfig("num_epochs must be at least 1".into()));
        }
        if training.batch_size == 0 {
            return Err(ClassifierError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !(training.train_ratio > 0.0 && training.train_ratio <= 1.0) {
            return Err(ClassifierError::InvalidConfig(format!(
                "train_ratio must be in (0, 1], got {}",
                training.train_ratio
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(ClassifierError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        if feature_map_size(self.model.image_size).is_none() {
            return Err(ClassifierError::InvalidConfig(format!(
                "image_size {} is too small for three conv/pool blocks",
                self.model.image_size
            )));
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!(
            "モデル: {} / クラスインデックス: {}",
            self.model.model_path.display(),
            self.model.class_indices_path.display()
        );
        tracing::info!(
            "入力サイズ: {0}x{0}, ドロップアウト率: {1}",
            self.model.image_size,
            self.model.dropout
        );
        tracing::info!(
            "学習データ: {}, エポック数: {}, バッチサイズ: {}, 学習率: {}, シード: {}",
            self.training.data_dir.display(),
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.image_size, 100);
        assert_eq!(config.training.num_epochs, 12);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.data_dir, PathBuf::from("fruits"));
        assert_eq!(config.gui.thumbnail_size, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "training": { "num_epochs": 1, "data_dir": "data" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.training.num_epochs, 1);
        assert_eq!(config.training.data_dir, PathBuf::from("data"));
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.model.class_indices_path, PathBuf::from("class_indices.json"));
        assert!(config.augmentation.horizontal_flip);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"device_type": "Wgpu", "training": {"seed": 7}}"#).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Wgpu);
        assert_eq!(loaded.training.seed, 7);
        assert_eq!(loaded.training.num_epochs, 12);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.training.train_ratio = 0.0;
        assert!(matches!(config.validate(), Err(ClassifierError::InvalidConfig(_))));

        let mut config = AppConfig::default();
        config.model.image_size = 12;
        assert!(matches!(config.validate(), Err(ClassifierError::InvalidConfig(_))));

        let mut config = AppConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
