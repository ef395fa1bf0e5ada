//! 学習済みモデルの確認用バイナリ
//!
//! 使い方: `inspect_model [モデルパス] [クラスインデックスパス]`
//! 省略時は設定ファイルのパスを使います。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use fruit_classifier_lib::logging;
use fruit_classifier_lib::model::{
    load_metadata, print_metadata_info, AppConfig, ClassIndices, InferenceConfig,
};

fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("{e}");
    }

    let config = AppConfig::load_or_default();
    let mut args = std::env::args().skip(1);
    let model_path = args.next().map(PathBuf::from).unwrap_or(config.model.model_path);
    let class_indices_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or(config.model.class_indices_path);

    match inspect(&model_path, &class_indices_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn inspect(model_path: &Path, class_indices_path: &Path) -> anyhow::Result<()> {
    let metadata = load_metadata(model_path)?;
    print_metadata_info(&metadata);

    let class_indices = ClassIndices::load(class_indices_path)?;
    tracing::info!("クラスインデックス ({}): {}", class_indices_path.display(), class_indices);

    let inference_config = InferenceConfig::from_metadata(&metadata);
    match inference_config.check_against(&class_indices) {
        Ok(()) => tracing::info!("✓ モデルとクラスインデックスは一致しています"),
        Err(e) => tracing::warn!("✗ {}", e),
    }
    Ok(())
}
