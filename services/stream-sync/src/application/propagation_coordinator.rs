// PropagationCoordinator - 1レコードを全同期先に伝播
//
// 同期先間で共有トランザクションは持たない。代わりに:
// - 先の同期先が失敗しても残りの同期先には必ず書き込む
// - 同期先ごとの結果をRecordOutcomeに集約して呼び出し元に返す
// 同期先は設定順に逐次呼び出し、ある同期先が他の結果を参照することはない。

use crate::domain::{ChangeRecord, Operation, PropagationOutcome, RecordOutcome};
use crate::infrastructure::target_adapter::TargetHandle;
use serde::Serialize;
use tracing::{debug, warn};

/// 1同期先の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub outcome: PropagationOutcome,
}

/// 1レコードの伝播結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    pub key: String,
    pub operation: Operation,
    pub outcome: RecordOutcome,
    /// 同期先ごとの結果（設定順）
    pub targets: Vec<TargetOutcome>,
}

impl RecordReport {
    /// 失敗した同期先名
    pub fn failed_targets(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter(|t| !t.outcome.is_success())
            .map(|t| t.target.as_str())
    }
}

/// 伝播コーディネーター
#[derive(Debug, Clone, Default)]
pub struct PropagationCoordinator;

impl PropagationCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// レコードを全同期先に適用する
    ///
    /// # Arguments
    /// * `record` - 適用するレコード
    /// * `handles` - バッチ用に確保済みのハンドル（設定順）
    ///
    /// # Returns
    /// * `RecordReport` - 同期先ごとの結果と集約結果（エラーは返さない）
    pub async fn propagate(
        &self,
        record: &ChangeRecord,
        handles: &mut [TargetHandle],
    ) -> RecordReport {
        let mut targets = Vec::with_capacity(handles.len());

        for handle in handles.iter_mut() {
            let outcome = handle.apply(record).await;
            debug!(
                target_store = handle.target(),
                key = record.key(),
                outcome = ?outcome,
                "同期先への適用完了"
            );
            targets.push(TargetOutcome {
                target: handle.target().to_string(),
                outcome,
            });
        }

        let outcome = RecordOutcome::reduce(targets.iter().map(|t| &t.outcome));
        let report = RecordReport {
            key: record.key().to_string(),
            operation: record.operation(),
            outcome,
            targets,
        };

        match outcome {
            RecordOutcome::Success => debug!(
                key = %report.key,
                operation = %report.operation,
                "レコードを全同期先に反映"
            ),
            RecordOutcome::PartialFailure | RecordOutcome::Failure => warn!(
                key = %report.key,
                operation = %report.operation,
                outcome = ?outcome,
                failed_targets = ?report.failed_targets().collect::<Vec<_>>(),
                "レコードの反映に失敗した同期先あり"
            ),
        }

        report
    }
}
