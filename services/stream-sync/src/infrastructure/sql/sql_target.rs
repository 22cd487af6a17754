// SqlTarget - sqlxドライバー共通の同期先
//
// バッチごとに1本の接続を確立し、レコードごとに
// BEGIN → 書き込み → COMMIT（失敗時ROLLBACK）を実行する。
// ドライバーごとに異なるのは接続オプションとSQL方言、文の実行だけで、
// それらはSqlDriverとして各ドライバー型に実装する。

use super::classify_sqlx_error;
use super::statement::{build_statement, Dialect, SqlStatement, SqlValue};
use crate::domain::{AdapterError, ChangeRecord, TableMapping};
use crate::infrastructure::config::TargetConfig;
use crate::infrastructure::target_adapter::{TargetSession, TargetStore, WriteEffect};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::query::Query;
use sqlx::{Connection, Database, Encode, Type};
use tracing::{debug, warn};

/// 接続オプション
pub type ConnectOptionsOf<DB> = <<DB as Database>::Connection as Connection>::Options;

/// sqlxドライバーごとの差分
#[async_trait]
pub trait SqlDriver: Database {
    /// SQL方言
    const DIALECT: Dialect;

    /// ログ用の表示名
    const LABEL: &'static str;

    /// 接続オプションを組み立てる
    fn connect_options(config: &TargetConfig, password: &str) -> ConnectOptionsOf<Self>;

    /// トランザクション内の接続で1文を実行し、影響行数を返す
    async fn execute_statement(
        conn: &mut Self::Connection,
        statement: &SqlStatement,
    ) -> Result<u64, sqlx::Error>;
}

/// SQL同期先
pub struct SqlTarget<DB: SqlDriver> {
    name: String,
    options: ConnectOptionsOf<DB>,
    mapping: TableMapping,
}

impl<DB: SqlDriver> std::fmt::Debug for SqlTarget<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTarget")
            .field("driver", &DB::LABEL)
            .field("name", &self.name)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl<DB: SqlDriver> SqlTarget<DB> {
    /// 解決済みのパスワードを使って同期先を作成
    pub fn new(config: &TargetConfig, password: &str, mapping: TableMapping) -> Self {
        Self {
            name: config.name().to_string(),
            options: DB::connect_options(config, password),
            mapping,
        }
    }

    /// 未接続のセッション（最初の実行時に接続する）
    fn detached_session(&self) -> SqlSession<DB> {
        SqlSession {
            name: self.name.clone(),
            options: self.options.clone(),
            mapping: self.mapping.clone(),
            conn: None,
        }
    }
}

#[async_trait]
impl<DB: SqlDriver> TargetStore for SqlTarget<DB> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Box<dyn TargetSession>, AdapterError> {
        let mut session = self.detached_session();
        session.connect().await?;
        Ok(Box::new(session))
    }
}

/// 1バッチ分のSQL接続
struct SqlSession<DB: SqlDriver> {
    name: String,
    options: ConnectOptionsOf<DB>,
    mapping: TableMapping,
    /// 破棄された後は`None`になり、次回の実行時に再接続する
    conn: Option<DB::Connection>,
}

impl<DB: SqlDriver> SqlSession<DB> {
    /// 未接続なら接続する
    async fn connect(&mut self) -> Result<&mut DB::Connection, AdapterError> {
        if self.conn.is_none() {
            debug!(target_store = %self.name, driver = DB::LABEL, "接続を確立");
            let conn = <DB::Connection as Connection>::connect_with(&self.options)
                .await
                .map_err(classify_sqlx_error)?;
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or_else(|| {
            AdapterError::ConnectionFailure(format!("{}の接続がありません", DB::LABEL))
        })
    }

    /// 1文をローカルトランザクションで実行する
    ///
    /// 文が失敗した場合はROLLBACKしてからエラーを返す。
    async fn run_in_transaction(&mut self, statement: &SqlStatement) -> Result<u64, AdapterError> {
        let name = self.name.clone();
        let conn = self.connect().await?;
        let mut tx = conn.begin().await.map_err(classify_sqlx_error)?;

        match DB::execute_statement(&mut *tx, statement).await {
            Ok(rows) => {
                tx.commit().await.map_err(classify_sqlx_error)?;
                Ok(rows)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(target_store = %name, error = %rollback_err, "ROLLBACKに失敗");
                }
                Err(classify_sqlx_error(err))
            }
        }
    }
}

#[async_trait]
impl<DB: SqlDriver> TargetSession for SqlSession<DB> {
    async fn execute(&mut self, record: &ChangeRecord) -> Result<WriteEffect, AdapterError> {
        let statement = build_statement(DB::DIALECT, &self.mapping, record)?;

        let result = self.run_in_transaction(&statement).await;
        if let Err(AdapterError::ConnectionFailure(_)) = &result {
            // 切れた接続は再利用しない
            self.conn = None;
        }
        result.map(WriteEffect::from_rows_affected)
    }

    async fn discard(&mut self) {
        // 切断するとサーバー側で未コミットのトランザクションが破棄される
        self.conn = None;
    }

    async fn release(self: Box<Self>) {
        let session = *self;
        if let Some(conn) = session.conn {
            if let Err(err) = conn.close().await {
                warn!(target_store = %session.name, error = %err, "接続のクローズに失敗");
            }
        }
    }
}

/// 値をバインドする
pub(super) fn bind<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    value: &SqlValue,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    String: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    BigDecimal: Encode<'q, DB> + Type<DB>,
{
    match value {
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Decimal(d) => query.bind(d.clone()),
        SqlValue::Bool(b) => query.bind(*b),
    }
}
