//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス順、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 一時ファイルに書き込んでからリネームする
///
/// 書き込み途中で失敗しても既存のファイルは壊れません。
pub fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        std::fs::remove_file(&temp_path).ok();
    }
    result
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
///
/// 拡張子に関わらず `output_path` にそのまま書き込み、そのパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = output_path.to_path_buf();

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar_builder = Builder::new(encoder);

    // メタデータをJSONとして追加
    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;

    // モデルバイナリを追加
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブを完成させる
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?;
    let bytes = encoder.finish().context("Failed to finalize gzip stream")?;

    write_atomically(&tar_gz_path, &bytes)
        .with_context(|| format!("Failed to write tar.gz file: {:?}", tar_gz_path))?;

    Ok(tar_gz_path)
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {name} to tar"))
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    // 両方のファイルを読み込む
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("=== モデルメタデータ ===");
    tracing::info!("クラス ({}): {}", metadata.num_classes(), metadata.class_labels.join(", "));
    tracing::info!("モデル入力サイズ: {0}x{0}", metadata.model_input_size);
    tracing::info!("全結合層: {} ユニット, ドロップアウト率: {}", metadata.hidden_units, metadata.dropout);
    tracing::info!("学習エポック数: {}, シード: {}", metadata.num_epochs, metadata.seed);
    tracing::info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(vec!["Apple".into(), "Banana".into()], 100, 128, 0.5, 12, 42)
    }

    #[test]
    fn saves_and_loads_archive() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_metadata();
        let binary = vec![1u8, 2, 3, 4, 5];

        let written = save_model_with_metadata(&dir.path().join("model.tar.gz"), &metadata, &binary).unwrap();
        assert_eq!(written, dir.path().join("model.tar.gz"));

        let (loaded_metadata, loaded_binary) = load_model_with_metadata(&written).unwrap();
        assert_eq!(loaded_metadata, metadata);
        assert_eq!(loaded_binary, binary);
        assert_eq!(load_metadata(&written).unwrap().class_labels, ["Apple", "Banana"]);
    }

    #[test]
    fn writes_to_the_configured_path_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fruit_classifier.bin");
        let written = save_model_with_metadata(&path, &sample_metadata(), &[7u8; 8]).unwrap();

        assert_eq!(written, path);
        assert!(!dir.path().join("fruit_classifier.tar.gz").exists());
        let (_, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(binary, vec![7u8; 8]);
    }

    #[test]
    fn overwrites_previous_artifact_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fruit_classifier.tar.gz");
        save_model_with_metadata(&path, &sample_metadata(), &[0u8; 16]).unwrap();
        save_model_with_metadata(&path, &sample_metadata(), &[9u8; 4]).unwrap();

        let (_, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(binary, vec![9u8; 4]);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn reports_missing_model_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        let json = sample_metadata().to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        std::fs::write(&path, bytes).unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("model.bin"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("nope.tar.gz")).is_err());
    }
}
