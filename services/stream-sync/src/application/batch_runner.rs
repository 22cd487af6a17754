// BatchRunner - ストリームバッチ単位の処理
//
// 1. 全同期先のハンドルをバッチ開始時に一度だけ確保
// 2. エントリを到着順にデコードし、コーディネーター経由で全同期先に伝播
// 3. ハンドルを解放し、件数とエントリごとの結果をBatchResultに集約
//
// ハンドル確保の失敗だけがバッチ全体を中断する。それ以外の失敗はエントリ単位の結果として返す。

use super::propagation_coordinator::{PropagationCoordinator, RecordReport};
use super::record_decoder::{DecodeError, RecordDecoder};
use crate::domain::{AdapterError, RecordOutcome};
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::target_adapter::{ApplyPolicy, TargetHandle, TargetStore};
use aws_lambda_events::event::dynamodb::EventRecord;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// エントリの処理結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EntryResult {
    /// デコードして全同期先に伝播した
    Propagated(RecordReport),
    /// デコードに失敗した（同期先には触れていない）
    DecodeFailed { error: DecodeError },
    /// バッチ中断のため処理していない
    Aborted,
}

/// 1エントリの結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    /// バッチ内の位置（0始まり）
    pub index: usize,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    #[serde(flatten)]
    pub result: EntryResult,
}

impl EntryReport {
    pub fn is_succeeded(&self) -> bool {
        matches!(
            &self.result,
            EntryResult::Propagated(report) if report.outcome == RecordOutcome::Success
        )
    }

    pub fn is_partial(&self) -> bool {
        matches!(
            &self.result,
            EntryResult::Propagated(report) if report.outcome == RecordOutcome::PartialFailure
        )
    }

    pub fn is_failed(&self) -> bool {
        !self.is_succeeded() && !self.is_partial()
    }

    /// 再配信で回復しうるか
    ///
    /// デコード失敗は同じ入力に対して必ず同じ結果になるため再試行しない。
    pub fn is_retryable(&self) -> bool {
        match &self.result {
            EntryResult::Propagated(report) => report.outcome != RecordOutcome::Success,
            EntryResult::DecodeFailed { .. } => false,
            EntryResult::Aborted => true,
        }
    }

    /// 部分バッチ応答で使う識別子（シーケンス番号、なければイベントID）
    pub fn item_identifier(&self) -> Option<&str> {
        self.sequence_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.event_id.as_str()).filter(|s| !s.is_empty()))
    }
}

/// バッチ全体の中断理由
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BatchAbort {
    /// 同期先ハンドルの確保に失敗
    #[error("同期先ハンドルの確保に失敗: target={target}, {error}")]
    HandleAcquisitionFailed { target: String, error: AdapterError },
}

/// バッチ処理結果
///
/// 全件失敗でもエラーにはせず、必ずこの値を返す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<BatchAbort>,
    /// エントリごとの結果（到着順）
    pub entries: Vec<EntryReport>,
}

impl BatchResult {
    fn from_entries(entries: Vec<EntryReport>, aborted: Option<BatchAbort>) -> Self {
        let succeeded = entries.iter().filter(|e| e.is_succeeded()).count();
        let partial = entries.iter().filter(|e| e.is_partial()).count();
        let failed = entries.iter().filter(|e| e.is_failed()).count();
        Self {
            total: entries.len(),
            succeeded,
            partial,
            failed,
            aborted,
            entries,
        }
    }

    /// 全エントリが成功したか
    pub fn is_complete_success(&self) -> bool {
        self.succeeded == self.total
    }

    /// 最初の再試行対象エントリ
    ///
    /// これ以降を再配信させることでキーごとの順序が保たれる。
    pub fn first_retryable(&self) -> Option<&EntryReport> {
        self.entries.iter().find(|e| e.is_retryable())
    }

    /// デッドレター（再試行しない失敗）
    pub fn dead_letters(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.result, EntryResult::DecodeFailed { .. }))
    }
}

/// バッチランナー
pub struct BatchRunner {
    stores: Vec<Arc<dyn TargetStore>>,
    decoder: RecordDecoder,
    coordinator: PropagationCoordinator,
    policy: ApplyPolicy,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let targets: Vec<&str> = self.stores.iter().map(|s| s.name()).collect();
        f.debug_struct("BatchRunner")
            .field("targets", &targets)
            .field("decoder", &self.decoder)
            .field("policy", &self.policy)
            .finish()
    }
}

impl BatchRunner {
    /// 新しいBatchRunnerを作成
    ///
    /// # 引数
    /// * `stores` - 同期先ストア（この順序で適用する）
    /// * `key_field` - キーフィールド名
    /// * `policy` - タイムアウトと再試行のポリシー
    pub fn new(
        stores: Vec<Arc<dyn TargetStore>>,
        key_field: impl Into<String>,
        policy: ApplyPolicy,
    ) -> Self {
        Self {
            stores,
            decoder: RecordDecoder::new(key_field),
            coordinator: PropagationCoordinator::new(),
            policy,
        }
    }

    /// 設定とストアから作成
    pub fn from_config(config: &SyncConfig, stores: Vec<Arc<dyn TargetStore>>) -> Self {
        Self::new(stores, config.mapping().key_field(), config.policy())
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.name()).collect()
    }

    /// バッチを処理する
    ///
    /// # Returns
    /// * `BatchResult` - 件数とエントリごとの結果（エラーは返さない）
    pub async fn run(&self, entries: &[EventRecord]) -> BatchResult {
        info!(
            record_count = entries.len(),
            targets = ?self.target_names(),
            "バッチ処理開始"
        );

        if entries.is_empty() {
            return BatchResult::from_entries(Vec::new(), None);
        }

        let mut handles = match self.acquire_handles().await {
            Ok(handles) => handles,
            Err(abort) => {
                error!(error = %abort, record_count = entries.len(), "バッチを中断");
                let reports = entries
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| Self::entry_report(index, entry, EntryResult::Aborted))
                    .collect();
                let result = BatchResult::from_entries(reports, Some(abort));
                Self::log_summary(&result);
                return result;
            }
        };

        let mut reports = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let result = match self.decoder.decode(entry) {
                Ok(record) => {
                    let report = self.coordinator.propagate(&record, &mut handles).await;
                    let lag_ms = (Utc::now() - entry.change.approximate_creation_date_time)
                        .num_milliseconds();
                    info!(
                        key = %report.key,
                        operation = %report.operation,
                        outcome = ?report.outcome,
                        replication_lag_ms = lag_ms,
                        "レコード処理完了"
                    );
                    EntryResult::Propagated(report)
                }
                Err(err) => {
                    error!(
                        index = index,
                        event_id = %entry.event_id,
                        event_name = %entry.event_name,
                        error = %err,
                        "デコード失敗（デッドレター）"
                    );
                    EntryResult::DecodeFailed { error: err }
                }
            };
            reports.push(Self::entry_report(index, entry, result));
        }

        for handle in handles {
            handle.release().await;
        }

        let result = BatchResult::from_entries(reports, None);
        Self::log_summary(&result);
        result
    }

    /// 全同期先のハンドルを設定順に確保する
    ///
    /// 1つでも失敗した場合は確保済みのハンドルを解放して中断理由を返す。
    async fn acquire_handles(&self) -> Result<Vec<TargetHandle>, BatchAbort> {
        let mut handles = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            match TargetHandle::acquire(store.as_ref(), self.policy).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        handle.release().await;
                    }
                    return Err(BatchAbort::HandleAcquisitionFailed {
                        target: store.name().to_string(),
                        error: err,
                    });
                }
            }
        }
        Ok(handles)
    }

    fn entry_report(index: usize, entry: &EventRecord, result: EntryResult) -> EntryReport {
        EntryReport {
            index,
            event_id: entry.event_id.clone(),
            sequence_number: entry.change.sequence_number.clone(),
            result,
        }
    }

    fn log_summary(result: &BatchResult) {
        if result.is_complete_success() {
            info!(
                total = result.total,
                succeeded = result.succeeded,
                partial = result.partial,
                failed = result.failed,
                "バッチ処理完了"
            );
        } else {
            warn!(
                total = result.total,
                succeeded = result.succeeded,
                partial = result.partial,
                failed = result.failed,
                dead_letters = result.dead_letters().count(),
                aborted = result.aborted.is_some(),
                "バッチ処理完了（失敗あり）"
            );
        }
    }
}
