// PostgresTarget - PostgreSQLへの同期
//
// INSERT ... ON CONFLICT DO NOTHING の影響行数で再配信を判定できる。

use super::sql_target::{bind, ConnectOptionsOf, SqlDriver, SqlTarget};
use super::statement::{Dialect, SqlStatement};
use crate::infrastructure::config::TargetConfig;
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{PgConnection, Postgres};

/// PostgreSQL同期先
pub type PostgresTarget = SqlTarget<Postgres>;

#[async_trait]
impl SqlDriver for Postgres {
    const DIALECT: Dialect = Dialect::Postgres;
    const LABEL: &'static str = "PostgreSQL";

    fn connect_options(config: &TargetConfig, password: &str) -> ConnectOptionsOf<Self> {
        PgConnectOptions::new()
            .host(config.host())
            .port(config.port())
            .username(config.user())
            .password(password)
            .database(config.database())
    }

    async fn execute_statement(
        conn: &mut PgConnection,
        statement: &SqlStatement,
    ) -> Result<u64, sqlx::Error> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind(query, param);
        }
        Ok(query.execute(conn).await?.rows_affected())
    }
}
