/// 伝播結果
///
/// 1レコード×1ターゲットの適用結果と、その集約規則を定義する。
use serde::Serialize;
use thiserror::Error;

/// ターゲットアダプターのエラー型
///
/// # エラー種別
/// - `ConnectionFailure`: 接続・通信の失敗（再試行対象）
/// - `ConstraintViolation`: 一意制約・外部キー制約などの違反
/// - `Timeout`: 呼び出しごとのタイムアウト超過（再試行対象）
/// - `InvalidMapping`: 列名がSQL識別子として使えない
/// - `Unknown`: その他のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AdapterError {
    /// 接続エラー
    #[error("接続エラー: {0}")]
    ConnectionFailure(String),

    /// 制約違反
    #[error("制約違反: {0}")]
    ConstraintViolation(String),

    /// タイムアウト
    #[error("タイムアウト: {0}")]
    Timeout(String),

    /// 列マッピング不正
    #[error("列マッピングが不正です: {0}")]
    InvalidMapping(String),

    /// 不明なエラー
    #[error("不明なエラー: {0}")]
    Unknown(String),
}

impl AdapterError {
    /// 再試行で回復しうるエラーか
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_) | Self::Timeout(_))
    }
}

/// 1レコード×1ターゲットの適用結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PropagationOutcome {
    /// 書き込んだ
    Applied,
    /// 既に反映済みのためスキップした（再配信）
    SkippedDuplicate,
    /// 失敗した（ローカルトランザクションはロールバック済み）
    Failed(AdapterError),
}

impl PropagationOutcome {
    /// 成功扱いか（スキップも成功に含む）
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// レコード単位の集約結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// 全ターゲットで成功
    Success,
    /// 一部のターゲットのみ成功
    PartialFailure,
    /// 全ターゲットで失敗
    Failure,
}

impl RecordOutcome {
    /// ターゲットごとの結果を集約する
    ///
    /// ターゲットが0件の場合は失敗がないため`Success`とする。
    pub fn reduce<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a PropagationOutcome>,
    {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for outcome in outcomes {
            if outcome.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        match (succeeded, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failure,
            _ => Self::PartialFailure,
        }
    }
}
