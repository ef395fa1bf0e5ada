//! ログ出力の初期化
//!
//! 標準出力へ書き出すグローバルな tracing subscriber を設定します。
//! レベルは `RUST_LOG` で変更でき、未指定なら `info` です。

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static INITIALIZED: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "info";

/// ログ初期化のエラー
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// グローバルsubscriberの設定に失敗
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// ログを初期化（2回目以降は何もしない）
///
/// 失敗はエラーとして返すので、呼び出し側はログなしで続行できます。
pub fn init() -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let stdout_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);
    let subscriber = Registry::default().with(build_env_filter()).with(stdout_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = INITIALIZED.set(());
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        // 他のテストが先にsubscriberを設定している可能性があるため結果は問わない
        let first = init();
        if first.is_ok() {
            assert!(init().is_ok());
        }
    }
}
