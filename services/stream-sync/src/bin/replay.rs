/// 保存済みストリームイベントの再生ツール
///
/// `sam local invoke -e event.json`と同じ形式のイベントファイルを読み込み、
/// Lambdaと同じBatchRunnerで処理して結果をJSONで標準出力に出す。
///
/// # ローカル実行
/// ```bash
/// # 設定済みのMySQL/PostgreSQLに反映
/// export MYSQL_HOST=localhost MYSQL_USER=app MYSQL_PASS=secret MYSQL_DB=shop
/// export PG_HOST=localhost PG_USER=app PG_PASS=secret PG_DB=shop
/// cargo run --bin replay -- --event events/insert_order.json
///
/// # DBに接続せずインメモリの同期先で確認
/// cargo run --bin replay -- --event events/insert_order.json --dry-run
///
/// # 同じバッチを3回再生して冪等性を確認
/// cargo run --bin replay -- --event events/insert_order.json --dry-run --repeat 3
/// ```
use aws_lambda_events::event::dynamodb::Event;
use clap::Parser;
use lambda_runtime::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stream_sync::application::{BatchResult, BatchRunner};
use stream_sync::infrastructure::{
    build_sql_targets, init_cli_logging, mapping_from_env, policy_from_env, AwsSsmOps,
    MemoryTarget, SyncConfig, TargetStore,
};
use tracing::{error, info};

/// インメモリ同期先の名前（設定順）
const DRY_RUN_TARGETS: [&str; 2] = ["mysql", "postgres"];

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "保存済みのDynamoDB Streamsイベントを同期先に再生")]
struct CliArgs {
    /// イベントファイル（Records配列を持つJSON）
    #[arg(long, short = 'e')]
    event: PathBuf,

    /// DBに接続せずインメモリの同期先を使う
    #[arg(long)]
    dry_run: bool,

    /// 同じバッチを再生する回数
    #[arg(long, short = 'r', default_value_t = 1)]
    repeat: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_cli_logging();

    let args = CliArgs::parse();
    let event = load_event(&args.event)?;
    info!(
        event_file = %args.event.display(),
        record_count = event.records.len(),
        dry_run = args.dry_run,
        repeat = args.repeat,
        "イベントを読み込み"
    );

    let runner = if args.dry_run {
        dry_run_runner()?
    } else {
        configured_runner().await?
    };

    let mut results: Vec<BatchResult> = Vec::new();
    for _ in 0..args.repeat.max(1) {
        results.push(runner.run(&event.records).await);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);

    let failed_runs = results.iter().filter(|r| !r.is_complete_success()).count();
    if failed_runs > 0 {
        error!(failed_runs = failed_runs, "失敗したレコードがあります");
        return Err(format!("{}回の再生で失敗したレコードがあります", failed_runs).into());
    }

    Ok(())
}

fn load_event(path: &Path) -> Result<Event, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        error!(error = %e, path = %path.display(), "イベントファイルの読み込みに失敗");
        Error::from(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        error!(error = %e, "イベントJSONのパースに失敗");
        Error::from(format!("Invalid event JSON: {}", e))
    })
}

/// インメモリ同期先でランナーを作成
fn dry_run_runner() -> Result<BatchRunner, Error> {
    let mapping = mapping_from_env()?;
    let policy = policy_from_env()?;
    let stores: Vec<Arc<dyn TargetStore>> = DRY_RUN_TARGETS
        .iter()
        .map(|name| Arc::new(MemoryTarget::new(*name, mapping.clone())) as Arc<dyn TargetStore>)
        .collect();
    Ok(BatchRunner::new(stores, mapping.key_field(), policy))
}

/// 環境変数の設定でランナーを作成
async fn configured_runner() -> Result<BatchRunner, Error> {
    let config = SyncConfig::from_env()?;
    let config = if config.needs_secret_resolution() {
        let ssm = AwsSsmOps::from_config().await;
        config.resolve_secrets(&ssm).await?
    } else {
        config
    };
    let stores = build_sql_targets(&config)?;
    Ok(BatchRunner::from_config(&config, stores))
}
