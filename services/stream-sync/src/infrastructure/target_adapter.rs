// ターゲットアダプター
//
// 1つの同期先ストアに対してChangeRecordを書き込む抽象。
// - TargetStore: 設定済みの同期先（バッチごとにセッションを払い出す）
// - TargetSession: 1バッチの間だけ使う接続。1呼び出し = 1ローカルトランザクション
// - TargetHandle: セッションにタイムアウトと再試行を被せ、結果をPropagationOutcomeに変換する

use crate::domain::{AdapterError, ChangeRecord, Operation, PropagationOutcome};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// 呼び出しごとのデフォルトタイムアウト（ミリ秒）
pub const DEFAULT_APPLY_TIMEOUT_MS: u64 = 5000;

/// デフォルトの最大再試行回数
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// デフォルトの再試行バックオフ（ミリ秒、試行ごとに倍）
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// 1回の書き込みがストアに与えた影響
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    /// 行を追加・更新・削除した
    Written,
    /// 影響なし（既存キーへのINSERT、存在しないキーのDELETE）
    Unchanged,
}

impl WriteEffect {
    /// 影響行数から判定
    pub fn from_rows_affected(rows: u64) -> Self {
        if rows == 0 { Self::Unchanged } else { Self::Written }
    }
}

/// 同期先ストア
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// ログと結果に使うターゲット名
    fn name(&self) -> &str;

    /// バッチ用のセッションを確立する
    async fn acquire(&self) -> Result<Box<dyn TargetSession>, AdapterError>;
}

/// 1バッチ分の接続
///
/// 同一バッチ内のレコードから逐次的に呼ばれる。並行利用はしない。
#[async_trait]
pub trait TargetSession: Send {
    /// 1件をローカルトランザクション内で書き込む
    ///
    /// エラーを返す場合、トランザクションはロールバック済みであること。
    async fn execute(&mut self, record: &ChangeRecord) -> Result<WriteEffect, AdapterError>;

    /// 中断された`execute`の後始末
    ///
    /// 接続を破棄し、未コミットのトランザクションをサーバー側で破棄させる。
    /// 次回の`execute`は再接続から始める。
    async fn discard(&mut self);

    /// 接続を解放する
    async fn release(self: Box<Self>);
}

/// 適用ポリシー（タイムアウトと再試行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyPolicy {
    /// 1呼び出しあたりのタイムアウト
    pub timeout: Duration,
    /// 一時的なエラーに対する最大再試行回数
    pub max_retries: u32,
    /// 最初の再試行までの待機時間
    pub retry_backoff: Duration,
}

impl ApplyPolicy {
    /// 一時的なエラーに対する再試行ポリシー
    ///
    /// `retry_backoff`から始めて試行ごとに倍にする。ジッターなし。
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_backoff)
            .with_max_times(self.max_retries as usize)
    }
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_APPLY_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// ターゲットハンドル
///
/// バッチランナーが1バッチの間だけ排他的に所有する。
pub struct TargetHandle {
    target: String,
    // 再試行クロージャから借用するためMutexで包む（競合はしない）
    session: Mutex<Box<dyn TargetSession>>,
    policy: ApplyPolicy,
}

impl std::fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetHandle")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TargetHandle {
    /// ストアからセッションを確立してハンドルを作成
    ///
    /// 接続確立もタイムアウトと再試行の対象とする。
    pub async fn acquire(
        store: &dyn TargetStore,
        policy: ApplyPolicy,
    ) -> Result<Self, AdapterError> {
        let session = (|| async move {
            match tokio::time::timeout(policy.timeout, store.acquire()).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout(format!(
                    "接続確立が{}msを超過",
                    policy.timeout.as_millis()
                ))),
            }
        })
        .retry(policy.backoff())
        .when(AdapterError::is_transient)
        .notify(|err, dur| {
            warn!(
                target_store = store.name(),
                error = %err,
                "セッション確立を{:.1}s後に再試行",
                dur.as_secs_f32()
            );
        })
        .await?;

        debug!(target_store = store.name(), "セッションを確立");
        Ok(Self::from_session(store.name(), session, policy))
    }

    /// ストアを介さずにハンドルを作成（テスト用）
    pub fn from_session(
        target: impl Into<String>,
        session: Box<dyn TargetSession>,
        policy: ApplyPolicy,
    ) -> Self {
        Self {
            target: target.into(),
            session: Mutex::new(session),
            policy,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// レコードを適用する
    ///
    /// エラーを外に投げず、必ずPropagationOutcomeとして返す。
    /// 一時的なエラーは指数バックオフで再試行する。各試行は独立したトランザクションで、
    /// 書き込みは冪等なため再試行しても状態は収束する。
    pub async fn apply(&mut self, record: &ChangeRecord) -> PropagationOutcome {
        let session = &self.session;
        let timeout = self.policy.timeout;
        let target = self.target.as_str();

        let result = (|| async move {
            let mut session = session.lock().await;
            execute_once(&mut **session, timeout, record).await
        })
        .retry(self.policy.backoff())
        .when(AdapterError::is_transient)
        .notify(|err, dur| {
            warn!(
                target_store = target,
                key = record.key(),
                operation = %record.operation(),
                error = %err,
                "書き込みを{:.1}s後に再試行",
                dur.as_secs_f32()
            );
        })
        .await;

        match result {
            Ok(effect) => Self::outcome_for(record.operation(), effect),
            Err(err) => {
                error!(
                    target_store = target,
                    key = record.key(),
                    operation = %record.operation(),
                    error = %err,
                    "書き込みに失敗"
                );
                PropagationOutcome::Failed(err)
            }
        }
    }

    /// セッションを解放する
    pub async fn release(self) {
        debug!(target_store = %self.target, "セッションを解放");
        self.session.into_inner().release().await;
    }

    fn outcome_for(operation: Operation, effect: WriteEffect) -> PropagationOutcome {
        match (operation, effect) {
            (Operation::Modify, _) | (_, WriteEffect::Written) => PropagationOutcome::Applied,
            (_, WriteEffect::Unchanged) => PropagationOutcome::SkippedDuplicate,
        }
    }
}

/// タイムアウト付きで1回だけ実行
///
/// タイムアウトまたは接続エラーの後は接続を信用できないため破棄する。
/// 次の試行（または次のレコード）は再接続から始まる。
async fn execute_once(
    session: &mut dyn TargetSession,
    timeout: Duration,
    record: &ChangeRecord,
) -> Result<WriteEffect, AdapterError> {
    let result = match tokio::time::timeout(timeout, session.execute(record)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(format!("{}msを超過", timeout.as_millis()))),
    };

    if let Err(err) = &result {
        if err.is_transient() {
            session.discard().await;
        }
    }
    result
}
