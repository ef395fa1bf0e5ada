//! 果物画像分類GUI
//!
//! 学習済みモデルを読み込んでからウィンドウを開きます。
//! モデルが無い場合はウィンドウを開かずに終了します。

use std::process::ExitCode;

use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn::backend::Wgpu;
use burn_wgpu::WgpuDevice;
use fruit_classifier_lib::app;
use fruit_classifier_lib::logging;
use fruit_classifier_lib::ml::Predictor;
use fruit_classifier_lib::model::{AppConfig, DeviceType};

fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("{e}");
    }

    let config = AppConfig::load_or_default();
    tracing::info!("計算デバイス: {}", config.device_type);

    let result = match config.device_type {
        DeviceType::Cpu => run::<NdArray<f32>>(&config, NdArrayDevice::Cpu),
        DeviceType::Wgpu => run::<Wgpu>(&config, WgpuDevice::default()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run<B: Backend>(config: &AppConfig, device: B::Device) -> anyhow::Result<()> {
    let predictor = Predictor::<B>::load(
        &config.model.model_path,
        &config.model.class_indices_path,
        device,
    )?;
    app::launch(predictor, &config.gui)
}
