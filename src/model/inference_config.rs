//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータとクラスインデックスを突き合わせ、
//! 推論に必要な情報（クラス順、入力サイズ）を取り出します。

use crate::error::ClassifierError;
use crate::ml::feature_map_size;
use crate::model::class_indices::ClassIndices;
use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// インデックス順のクラス名
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub model_input_size: usize,

    /// 全結合層のユニット数
    pub hidden_units: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            model_input_size: metadata.model_input_size as usize,
            hidden_units: metadata.hidden_units as usize,
        }
    }

    /// クラスインデックスとの整合性、入力サイズの妥当性を検証
    pub fn check_against(&self, class_indices: &ClassIndices) -> Result<(), ClassifierError> {
        let labels = class_indices.to_index_labels()?;
        if labels != self.class_labels {
            return Err(ClassifierError::ArtifactMismatch(format!(
                "mapping has [{}] but model was trained on [{}]",
                labels.join(", "),
                self.class_labels.join(", ")
            )));
        }
        if feature_map_size(self.model_input_size).is_none() {
            return Err(ClassifierError::ArtifactMismatch(format!(
                "embedded input size {} is not usable",
                self.model_input_size
            )));
        }
        if self.hidden_units == 0 {
            return Err(ClassifierError::ArtifactMismatch("hidden_units is zero".into()));
        }
        Ok(())
    }

    /// クラス数を取得
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからクラス名を取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        tracing::info!(
            "推論設定: {} クラス [{}], 入力サイズ {}x{}",
            self.num_classes(),
            self.class_labels.join(", "),
            self.model_input_size,
            self.model_input_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(labels: &[&str], size: usize) -> InferenceConfig {
        InferenceConfig {
            class_labels: labels.iter().map(|s| s.to_string()).collect(),
            model_input_size: size,
            hidden_units: 128,
        }
    }

    #[test]
    fn looks_up_labels_by_index() {
        let config = config(&["Apple", "Banana"], 100);
        assert_eq!(config.class_index_to_label(1), Some("Banana"));
        assert_eq!(config.class_index_to_label(2), None);
    }

    #[test]
    fn accepts_matching_mapping() {
        let indices = ClassIndices::from_class_names(&["Apple", "Banana"]).unwrap();
        assert!(config(&["Apple", "Banana"], 100).check_against(&indices).is_ok());
    }

    #[test]
    fn rejects_reordered_or_resized_model() {
        let indices = ClassIndices::from_class_names(&["Apple", "Banana"]).unwrap();
        assert!(matches!(
            config(&["Banana", "Apple"], 100).check_against(&indices),
            Err(ClassifierError::ArtifactMismatch(_))
        ));
        assert!(matches!(
            config(&["Apple"], 100).check_against(&indices),
            Err(ClassifierError::ArtifactMismatch(_))
        ));
        assert!(matches!(
            config(&["Apple", "Banana"], 8).check_against(&indices),
            Err(ClassifierError::ArtifactMismatch(_))
        ));
    }
}
