/// DynamoDB Streams同期Lambda関数
///
/// 注文テーブルのストリームイベントをMySQLとPostgreSQLに反映する。
/// 各レコードは全同期先に試行され、失敗は部分バッチ応答としてLambdaに返す。
///
/// # 環境変数
/// - SYNC_TARGETS: 同期先の順序（デフォルト: mysql,postgres）
/// - MYSQL_HOST / MYSQL_USER / MYSQL_DB: MySQL接続先（必須）
/// - MYSQL_PASS または MYSQL_PASS_PARAMETER: パスワードまたはSSMパラメータ名
/// - PG_HOST / PG_USER / PG_DB: PostgreSQL接続先（必須）
/// - PG_PASS または PG_PASS_PARAMETER: パスワードまたはSSMパラメータ名
/// - SYNC_TABLE / SYNC_KEY_FIELD / SYNC_COLUMNS: テーブルマッピング
/// - SYNC_APPLY_TIMEOUT_MS / SYNC_MAX_RETRIES / SYNC_RETRY_BACKOFF_MS: 適用ポリシー
use aws_lambda_events::event::dynamodb::Event;
use aws_lambda_events::event::streams::DynamoDbEventResponse;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use std::sync::Arc;
use stream_sync::application::{partial_batch_response, BatchRunner};
use stream_sync::infrastructure::{build_sql_targets, init_logging, AwsSsmOps, SyncConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // 設定はコールドスタート時に一度だけ読み込む
    let config = SyncConfig::from_env().inspect_err(|e| {
        error!(error = %e, "同期設定の読み込みに失敗");
    })?;

    let config = if config.needs_secret_resolution() {
        let ssm = AwsSsmOps::from_config().await;
        config.resolve_secrets(&ssm).await.inspect_err(|e| {
            error!(error = %e, "パスワードの取得に失敗");
        })?
    } else {
        config
    };

    let stores = build_sql_targets(&config)?;
    let runner = Arc::new(BatchRunner::from_config(&config, stores));
    info!(
        targets = ?runner.target_names(),
        table = config.mapping().table(),
        "同期Lambdaを初期化"
    );

    let func = service_fn(move |event: LambdaEvent<Event>| {
        let runner = Arc::clone(&runner);
        async move { handler(&runner, event).await }
    });
    lambda_runtime::run(func).await?;
    Ok(())
}

/// Lambda関数のメインハンドラー
///
/// # 処理フロー
/// 1. バッチ内のレコードを到着順にデコード・伝播
/// 2. 処理結果をログに記録
/// 3. 最初の再試行対象レコードを部分バッチ応答として返す
async fn handler(
    runner: &BatchRunner,
    event: LambdaEvent<Event>,
) -> Result<DynamoDbEventResponse, Error> {
    let records = event.payload.records;
    info!(
        record_count = records.len(),
        request_id = %event.context.request_id,
        "DynamoDB Streamsイベントを受信"
    );

    let result = runner.run(&records).await;
    let response = partial_batch_response(&result);

    if let Some(failure) = response.batch_item_failures.first() {
        info!(item_identifier = ?failure.item_identifier, "再配信を要求");
    }

    Ok(response)
}
