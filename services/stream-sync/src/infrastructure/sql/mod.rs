// SQL同期先モジュール
//
// sqlxの単一接続を使ってMySQL/PostgreSQLに変更を書き込む。
// - SqlTarget: ドライバー共通のTargetStore実装
// - MySqlTarget / PostgresTarget: ドライバーごとの差分（SqlDriver）
// - statement: 方言ごとの冪等なSQL文の生成

mod mysql_target;
mod postgres_target;
mod sql_target;
pub mod statement;

pub use mysql_target::MySqlTarget;
pub use postgres_target::PostgresTarget;
pub use sql_target::{SqlDriver, SqlTarget};

use crate::domain::AdapterError;
use crate::infrastructure::config::{ConfigError, SyncConfig, TargetKind};
use crate::infrastructure::target_adapter::TargetStore;
use sqlx::error::ErrorKind;
use std::sync::Arc;

/// sqlxのエラーをAdapterErrorに分類
pub(crate) fn classify_sqlx_error(err: sqlx::Error) -> AdapterError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => AdapterError::ConnectionFailure(err.to_string()),
        sqlx::Error::Database(db_err) => match db_err.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => AdapterError::ConstraintViolation(err.to_string()),
            _ => AdapterError::Unknown(err.to_string()),
        },
        _ => AdapterError::Unknown(err.to_string()),
    }
}

/// 設定から同期先ストアを構築する（設定順を保持）
///
/// パスワードは事前に解決済みであること。
pub fn build_sql_targets(config: &SyncConfig) -> Result<Vec<Arc<dyn TargetStore>>, ConfigError> {
    config
        .targets()
        .iter()
        .map(|target| {
            let password = target
                .password()
                .ok_or_else(|| ConfigError::UnresolvedSecret(target.name().to_string()))?;
            let store: Arc<dyn TargetStore> = match target.kind() {
                TargetKind::MySql => {
                    Arc::new(MySqlTarget::new(target, password, config.mapping().clone()))
                }
                TargetKind::Postgres => {
                    Arc::new(PostgresTarget::new(target, password, config.mapping().clone()))
                }
            };
            Ok(store)
        })
        .collect()
}
