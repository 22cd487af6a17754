/// DynamoDB Streamsの部分バッチ応答
///
/// Lambdaのイベントソースマッピングで`ReportBatchItemFailures`を有効にした場合の応答形式。
/// 最初の再試行対象エントリだけを返すと、Lambdaはそのエントリ以降を再配信する。
use super::batch_runner::BatchResult;
use aws_lambda_events::event::streams::{DynamoDbBatchItemFailure, DynamoDbEventResponse};

/// バッチ結果から部分バッチ応答を作成
///
/// 識別子を持たないエントリが再試行対象の場合は、バッチ全体を再配信させるため
/// 先頭エントリの識別子を返す。
pub fn partial_batch_response(result: &BatchResult) -> DynamoDbEventResponse {
    let identifier = result.first_retryable().and_then(|retry| {
        retry.item_identifier().or_else(|| {
            result
                .entries
                .first()
                .and_then(|entry| entry.item_identifier())
        })
    });

    DynamoDbEventResponse {
        batch_item_failures: identifier
            .map(|id| DynamoDbBatchItemFailure {
                item_identifier: Some(id.to_string()),
            })
            .into_iter()
            .collect(),
    }
}
