//! クラス名とインデックスの対応表
//!
//! `{"Apple": 0, "Banana": 1}` のようなフラットなJSONオブジェクトとして保存されます。
//! 学習時に作成され、推論時にインデックス→クラス名へ逆引きするために読み込まれます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ClassifierError;
use crate::model::model_storage::write_atomically;

/// クラス名 → インデックスの対応表
///
/// インデックスは常に `0..N` の連番で、名前・インデックスともに重複しません。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassIndices(BTreeMap<String, usize>);

impl ClassIndices {
    /// クラス名の並び順でインデックスを割り当てる
    pub fn from_class_names<S: AsRef<str>>(class_names: &[S]) -> Result<Self, ClassifierError> {
        let mut map = BTreeMap::new();
        for (index, name) in class_names.iter().enumerate() {
            let name = name.as_ref();
            if map.insert(name.to_string(), index).is_some() {
                return Err(ClassifierError::InvalidMapping(format!(
                    "duplicate class name '{name}'"
                )));
            }
        }
        let indices = Self(map);
        indices.validate()?;
        Ok(indices)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// クラス名からインデックスを取得
    pub fn index_of(&self, class_name: &str) -> Option<usize> {
        self.0.get(class_name).copied()
    }

    /// (クラス名, インデックス) を名前順に列挙
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, index)| (name.as_str(), *index))
    }

    /// インデックスが `0..N` をちょうど1回ずつ覆っているか検証
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.0.is_empty() {
            return Err(ClassifierError::InvalidMapping("no classes".into()));
        }
        let mut seen = vec![false; self.0.len()];
        for (name, &index) in &self.0 {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(ClassifierError::InvalidMapping(format!(
                        "index {index} is assigned more than once ('{name}')"
                    )))
                }
                None => {
                    return Err(ClassifierError::InvalidMapping(format!(
                        "index {index} of '{name}' is outside 0..{}",
                        self.0.len()
                    )))
                }
            }
        }
        Ok(())
    }

    /// インデックス順のクラス名一覧（逆引き表）
    pub fn to_index_labels(&self) -> Result<Vec<String>, ClassifierError> {
        self.validate()?;
        let mut labels = vec![String::new(); self.0.len()];
        for (name, &index) in &self.0 {
            labels[index] = name.clone();
        }
        Ok(labels)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize class indices to JSON")
    }

    pub fn from_json_string(json: &str) -> Result<Self> {
        let indices: Self =
            serde_json::from_str(json).context("Failed to deserialize class indices from JSON")?;
        indices.validate()?;
        Ok(indices)
    }

    /// JSONファイルとして保存（既存ファイルは上書き）
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json_string()?;
        write_atomically(path, json.as_bytes())
            .with_context(|| format!("Failed to write class indices: {:?}", path))
    }

    /// JSONファイルから読み込み、内容を検証する
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read class indices: {:?}", path))?;
        Self::from_json_string(&json)
    }
}

impl std::fmt::Display for ClassIndices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<(&str, usize)> = self.iter().collect();
        entries.sort_by_key(|(_, index)| *index);
        write!(f, "{{")?;
        for (i, (name, index)) in entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{name}': {index}")?;
        }
        write!(f, "}}")
    }
}
