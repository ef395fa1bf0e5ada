//! 果物画像分類モデルの学習
//!
//! カレントディレクトリの `config.json`（無ければデフォルト設定）に従い、
//! `fruits/<クラス名>/*.jpg` から学習してモデルとクラスインデックスを書き出します。
//!
//! 終了コード: 0 = 成功, 1 = 学習失敗, 2 = 学習データや設定の不備

use std::process::ExitCode;

use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn::backend::Wgpu;
use burn_wgpu::WgpuDevice;
use fruit_classifier_lib::logging;
use fruit_classifier_lib::ml::{train_model, TrainingReport};
use fruit_classifier_lib::model::{AppConfig, DeviceType};
use fruit_classifier_lib::ClassifierError;

const EXIT_TRAINING_FAILED: u8 = 1;
const EXIT_PRECONDITION: u8 = 2;

fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("{e}");
    }

    let config = AppConfig::load_or_default();
    config.display();

    let result = match config.device_type {
        DeviceType::Cpu => run::<Autodiff<NdArray<f32>>>(&config, NdArrayDevice::Cpu),
        DeviceType::Wgpu => run::<Autodiff<Wgpu>>(&config, WgpuDevice::default()),
    };

    match result {
        Ok(report) => {
            if let Some(last) = report.epochs.last() {
                tracing::info!(
                    "最終エポック: loss {:.4}, accuracy {:.2}%",
                    last.train_loss,
                    last.train_accuracy
                );
            }
            tracing::info!("Training complete!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> anyhow::Result<TrainingReport> {
    train_model::<B>(config, device)
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ClassifierError>() {
        Some(
            ClassifierError::MissingDataDir(_)
            | ClassifierError::EmptyDataset(_)
            | ClassifierError::InvalidConfig(_),
        ) => EXIT_PRECONDITION,
        _ => EXIT_TRAINING_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn precondition_failures_exit_with_two() {
        let missing: anyhow::Error = ClassifierError::MissingDataDir(PathBuf::from("fruits")).into();
        let empty: anyhow::Error = ClassifierError::EmptyDataset(PathBuf::from("fruits")).into();
        assert_eq!(exit_code_for(&missing), EXIT_PRECONDITION);
        assert_eq!(exit_code_for(&empty), EXIT_PRECONDITION);
    }

    #[test]
    fn training_failures_exit_with_one() {
        let failed: anyhow::Error = ClassifierError::Training("nan loss".into()).into();
        assert_eq!(exit_code_for(&failed), EXIT_TRAINING_FAILED);
        let unreadable: anyhow::Error = ClassifierError::UnreadableImage {
            path: PathBuf::from("fruits/Apple/bad.jpg"),
            source: image::ImageError::IoError(std::io::Error::other("truncated")),
        }
        .into();
        assert_eq!(exit_code_for(&unreadable), EXIT_TRAINING_FAILED);
        assert_eq!(exit_code_for(&anyhow::anyhow!("disk full")), EXIT_TRAINING_FAILED);
    }
}
