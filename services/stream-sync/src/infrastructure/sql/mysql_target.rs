// MySqlTarget - MySQLへの同期
//
// INSERT ... ON DUPLICATE KEY UPDATEは既存行を更新すると影響行数2、
// 値が同じなら0を返す。WriteEffectでは0以外を書き込み扱いにする。

use super::sql_target::{bind, ConnectOptionsOf, SqlDriver, SqlTarget};
use super::statement::{Dialect, SqlStatement};
use crate::infrastructure::config::TargetConfig;
use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{MySql, MySqlConnection};

/// MySQL同期先
pub type MySqlTarget = SqlTarget<MySql>;

#[async_trait]
impl SqlDriver for MySql {
    const DIALECT: Dialect = Dialect::MySql;
    const LABEL: &'static str = "MySQL";

    fn connect_options(config: &TargetConfig, password: &str) -> ConnectOptionsOf<Self> {
        MySqlConnectOptions::new()
            .host(config.host())
            .port(config.port())
            .username(config.user())
            .password(password)
            .database(config.database())
    }

    async fn execute_statement(
        conn: &mut MySqlConnection,
        statement: &SqlStatement,
    ) -> Result<u64, sqlx::Error> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind(query, param);
        }
        Ok(query.execute(conn).await?.rows_affected())
    }
}
