/// ログ基盤モジュール
///
/// tracingクレートによる構造化ログの設定。
/// - Lambda: JSON形式で標準出力（CloudWatch向け）
/// - replay CLI: 人間が読める形式で標準エラー（標準出力は結果JSON専用）
use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログサブスクライバー初期化用の同期プリミティブ
static INIT: Once = Once::new();

/// `RUST_LOG`、未設定なら指定レベルのフィルター
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Lambda環境向けのログサブスクライバーを初期化する
///
/// 複数回呼び出しても最初の呼び出しのみ初期化を実行する。
pub fn init_logging() {
    INIT.call_once(|| {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .flatten_event(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter("info"))
            .with(json_layer)
            .init();
    });
}

/// replay CLI向けのログサブスクライバーを初期化する
///
/// # 使用例
/// ```ignore
/// use stream_sync::infrastructure::init_cli_logging;
///
/// init_cli_logging();
/// tracing::info!(record_count = 3, "replay開始");
/// ```
pub fn init_cli_logging() {
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact();

        tracing_subscriber::registry()
            .with(env_filter("warn"))
            .with(fmt_layer)
            .init();
    });
}

/// テスト用のログサブスクライバーを初期化する
#[cfg(test)]
pub fn init_test_logging() {
    static TEST_INIT: Once = Once::new();

    TEST_INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(env_filter("debug"))
            .with(fmt_layer)
            .try_init();
    });
}
