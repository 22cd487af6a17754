// MemoryTarget - プロセス内の同期先
//
// MySQL/PostgreSQLと同じ書き込み規則（INSERTは既存キーを無視、MODIFYはupsert、
// REMOVEは存在すれば削除）をプロセス内のテーブルに適用する。
// replayのドライランと、障害注入によるテストに使用する。

use super::target_adapter::{TargetSession, TargetStore, WriteEffect};
use crate::domain::{AdapterError, ChangeRecord, FieldMap, Operation, ScalarValue, TableMapping};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// キー → 行
pub type MemoryRows = BTreeMap<String, FieldMap>;

/// 障害注入モード
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// 正常動作
    #[default]
    Healthy,
    /// セッション確立を拒否する
    RefuseConnections,
    /// すべての書き込みを指定エラーで失敗させる
    FailWrites(AdapterError),
    /// コミット直前に指定時間停止する（タイムアウト検証用）
    StallBeforeCommit(Duration),
}

/// プロセス内の同期先ストア
///
/// テーブルの内容はバッチをまたいで保持される（実DBと同じ扱い）。
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    name: String,
    mapping: TableMapping,
    rows: Arc<Mutex<MemoryRows>>,
    fault: Arc<Mutex<FaultMode>>,
    open_sessions: Arc<AtomicUsize>,
}

impl MemoryTarget {
    /// 空のテーブルを持つMemoryTargetを作成
    pub fn new(name: impl Into<String>, mapping: TableMapping) -> Self {
        Self {
            name: name.into(),
            mapping,
            rows: Arc::new(Mutex::new(MemoryRows::new())),
            fault: Arc::new(Mutex::new(FaultMode::Healthy)),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 障害注入モードを指定して作成
    pub fn with_fault(self, fault: FaultMode) -> Self {
        self.set_fault(fault);
        self
    }

    /// 障害注入モードを切り替える
    pub fn set_fault(&self, fault: FaultMode) {
        *lock(&self.fault) = fault;
    }

    /// 現在の全行のスナップショット
    pub fn rows(&self) -> MemoryRows {
        lock(&self.rows).clone()
    }

    /// 指定キーの行
    pub fn row(&self, key: &str) -> Option<FieldMap> {
        lock(&self.rows).get(key).cloned()
    }

    /// 未解放のセッション数
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Box<dyn TargetSession>, AdapterError> {
        if *lock(&self.fault) == FaultMode::RefuseConnections {
            return Err(AdapterError::ConnectionFailure(format!(
                "{}への接続が拒否されました",
                self.name
            )));
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            target: self.clone(),
        }))
    }
}

/// MemoryTargetのセッション
///
/// ドロップ時にセッション数を減らすため、解放漏れをテストで検出できる。
struct MemorySession {
    target: MemoryTarget,
}

impl MemorySession {
    /// 現在の行にレコードを適用した結果を計算する（まだコミットしない）
    fn stage(&self, record: &ChangeRecord) -> (Option<FieldMap>, WriteEffect) {
        let current = lock(&self.target.rows).get(record.key()).cloned();

        match record.operation() {
            Operation::Insert => match current {
                Some(existing) => (Some(existing), WriteEffect::Unchanged),
                None => (Some(self.build_row(FieldMap::new(), record)), WriteEffect::Written),
            },
            Operation::Modify => {
                let base = current.unwrap_or_default();
                (Some(self.build_row(base, record)), WriteEffect::Written)
            }
            Operation::Remove => match current {
                Some(_) => (None, WriteEffect::Written),
                None => (None, WriteEffect::Unchanged),
            },
        }
    }

    fn build_row(&self, mut row: FieldMap, record: &ChangeRecord) -> FieldMap {
        row.insert(
            self.target.mapping.key_field().to_string(),
            ScalarValue::String(record.key().to_string()),
        );
        for (column, value) in self.target.mapping.project(record) {
            // NULLは列を持たないことで表す
            match value {
                Some(value) => row.insert(column.to_string(), value.clone()),
                None => row.remove(column),
            };
        }
        row
    }
}

#[async_trait]
impl TargetSession for MemorySession {
    async fn execute(&mut self, record: &ChangeRecord) -> Result<WriteEffect, AdapterError> {
        let fault = lock(&self.target.fault).clone();
        if let FaultMode::FailWrites(err) = &fault {
            return Err(err.clone());
        }

        let (staged, effect) = self.stage(record);

        if let FaultMode::StallBeforeCommit(duration) = &fault {
            // ここで呼び出しが破棄された場合、ステージした行は捨てられる
            tokio::time::sleep(*duration).await;
        }

        let mut rows = lock(&self.target.rows);
        match staged {
            Some(row) => {
                rows.insert(record.key().to_string(), row);
            }
            None => {
                rows.remove(record.key());
            }
        }

        debug!(
            target_store = %self.target.name,
            key = record.key(),
            operation = %record.operation(),
            "メモリテーブルにコミット"
        );
        Ok(effect)
    }

    async fn discard(&mut self) {}

    async fn release(self: Box<Self>) {}
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.target.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
