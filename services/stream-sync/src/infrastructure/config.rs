/// 同期設定
///
/// 同期先ごとの接続情報、テーブルマッピング、適用ポリシーを保持する。
/// プロセス全体の環境変数を直接参照せず、この構造体をBatchRunnerに渡す。
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::ssm_ops::{SsmOps, SsmOpsError};
use super::target_adapter::{
    ApplyPolicy, DEFAULT_APPLY_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS,
};
use crate::domain::table_mapping::{DEFAULT_COLUMNS, DEFAULT_KEY_FIELD, DEFAULT_TABLE};
use crate::domain::TableMapping;

/// デフォルトの同期先（この順に書き込む）
pub const DEFAULT_TARGETS: &str = "mysql,postgres";

/// 同期設定のエラー型
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必須の環境変数が設定されていない
    #[error("必須の環境変数が設定されていません: {0}")]
    MissingEnvVar(String),

    /// 環境変数の値が不正
    #[error("環境変数の値が不正です: {name}={value}")]
    InvalidValue { name: String, value: String },

    /// 同期先が1つもない
    #[error("同期先が設定されていません")]
    NoTargets,

    /// パスワードがParameter Storeから未解決
    #[error("パスワードが未解決です: {0}")]
    UnresolvedSecret(String),
}

/// 同期先の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    MySql,
    Postgres,
}

impl TargetKind {
    /// SYNC_TARGETSの要素から判定
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Some(Self::MySql),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// ターゲット名（ログと結果に使用）
    pub fn name(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// 接続情報の環境変数プレフィックス
    fn env_prefix(&self) -> &'static str {
        match self {
            Self::MySql => "MYSQL",
            Self::Postgres => "PG",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }
}

/// パスワードの取得元
#[derive(Clone, PartialEq, Eq)]
pub enum PasswordSource {
    /// 平文（環境変数で直接指定、または解決済み）
    Plain(String),
    /// SSM Parameter StoreのSecureStringパラメータ名
    Parameter(String),
}

impl fmt::Debug for PasswordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(***)"),
            Self::Parameter(name) => f.debug_tuple("Parameter").field(name).finish(),
        }
    }
}

/// 同期先1つ分の接続設定
///
/// # フィールド
/// - `host` / `port` / `user` / `database`: 接続先
/// - `password`: 平文またはParameter Storeのパラメータ名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    kind: TargetKind,
    host: String,
    port: u16,
    user: String,
    password: PasswordSource,
    database: String,
}

impl TargetConfig {
    /// 平文パスワードで設定を作成（ポートは種別のデフォルト）
    pub fn new(
        kind: TargetKind,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port: kind.default_port(),
            user: user.into(),
            password: PasswordSource::Plain(password.into()),
            database: database.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: PasswordSource) -> Self {
        self.password = password;
        self
    }

    /// 環境変数から読み込み
    ///
    /// # 環境変数（MySQLの場合。PostgreSQLはPG_プレフィックス）
    /// - `MYSQL_HOST`, `MYSQL_USER`, `MYSQL_DB`（必須）
    /// - `MYSQL_PASS` または `MYSQL_PASS_PARAMETER`（どちらか必須、前者を優先）
    /// - `MYSQL_PORT`（任意）
    pub fn from_env(kind: TargetKind) -> Result<Self, ConfigError> {
        let prefix = kind.env_prefix();
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let host = required(&var("HOST"))?;
        let user = required(&var("USER"))?;
        let database = required(&var("DB"))?;

        let password = match optional(&var("PASS")) {
            Some(password) => PasswordSource::Plain(password),
            None => match optional(&var("PASS_PARAMETER")) {
                Some(parameter) => PasswordSource::Parameter(parameter),
                None => return Err(ConfigError::MissingEnvVar(var("PASS"))),
            },
        };

        let port = parse_or(&var("PORT"), kind.default_port())?;

        Ok(Self {
            kind,
            host,
            port,
            user,
            password,
            database,
        })
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// 解決済みのパスワード（Parameter Store未解決なら`None`）
    pub fn password(&self) -> Option<&str> {
        match &self.password {
            PasswordSource::Plain(password) => Some(password),
            PasswordSource::Parameter(_) => None,
        }
    }

    /// Parameter Storeのパスワードを解決する
    pub async fn resolve_password(self, ssm: &dyn SsmOps) -> Result<Self, SsmOpsError> {
        let parameter = match &self.password {
            PasswordSource::Plain(_) => None,
            PasswordSource::Parameter(name) => Some(name.clone()),
        };
        let Some(parameter) = parameter else {
            return Ok(self);
        };

        let password = ssm.get_secure_parameter(&parameter).await?;
        Ok(self.with_password(PasswordSource::Plain(password)))
    }
}

/// 同期設定全体
#[derive(Debug, Clone)]
pub struct SyncConfig {
    targets: Vec<TargetConfig>,
    mapping: TableMapping,
    policy: ApplyPolicy,
}

impl SyncConfig {
    /// 明示的な値で作成
    ///
    /// 同期先が空の場合は`ConfigError::NoTargets`。
    pub fn new(
        targets: Vec<TargetConfig>,
        mapping: TableMapping,
        policy: ApplyPolicy,
    ) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(Self {
            targets,
            mapping,
            policy,
        })
    }

    /// 環境変数から読み込み
    ///
    /// # 環境変数
    /// - `SYNC_TARGETS`: 同期先の種別をカンマ区切りで（デフォルト: mysql,postgres）
    /// - 各同期先の接続情報（`TargetConfig::from_env`参照）
    /// - テーブルマッピング（`mapping_from_env`参照）
    /// - 適用ポリシー（`policy_from_env`参照）
    pub fn from_env() -> Result<Self, ConfigError> {
        let names = optional("SYNC_TARGETS").unwrap_or_else(|| DEFAULT_TARGETS.to_string());

        let mut targets = Vec::new();
        for name in names.split(',').filter(|s| !s.trim().is_empty()) {
            let kind = TargetKind::parse(name).ok_or_else(|| ConfigError::InvalidValue {
                name: "SYNC_TARGETS".to_string(),
                value: names.clone(),
            })?;
            targets.push(TargetConfig::from_env(kind)?);
        }

        Self::new(targets, mapping_from_env()?, policy_from_env()?)
    }

    pub fn targets(&self) -> &[TargetConfig] {
        &self.targets
    }

    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    pub fn policy(&self) -> ApplyPolicy {
        self.policy
    }

    /// Parameter Storeから取得すべきパスワードがあるか
    pub fn needs_secret_resolution(&self) -> bool {
        self.targets.iter().any(|t| t.password().is_none())
    }

    /// すべての同期先のパスワードを解決する
    pub async fn resolve_secrets(self, ssm: &dyn SsmOps) -> Result<Self, SsmOpsError> {
        let mut targets = Vec::with_capacity(self.targets.len());
        for target in self.targets {
            targets.push(target.resolve_password(ssm).await?);
        }
        Ok(Self { targets, ..self })
    }
}

/// テーブルマッピングを環境変数から読み込み
///
/// # 環境変数
/// - `SYNC_TABLE`: テーブル名（デフォルト: orders）
/// - `SYNC_KEY_FIELD`: キーフィールド（デフォルト: order_id）
/// - `SYNC_COLUMNS`: 書き込む列をカンマ区切りで（デフォルト: customer_name,amount、空文字列で全フィールド）
pub fn mapping_from_env() -> Result<TableMapping, ConfigError> {
    let table = optional("SYNC_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string());
    let key_field = optional("SYNC_KEY_FIELD").unwrap_or_else(|| DEFAULT_KEY_FIELD.to_string());
    let mapping = TableMapping::new(table, key_field);

    match std::env::var("SYNC_COLUMNS") {
        Ok(columns) if columns.trim().is_empty() => Ok(mapping),
        Ok(columns) => Ok(mapping.with_columns(
            columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        )),
        Err(_) => Ok(mapping.with_columns(DEFAULT_COLUMNS)),
    }
}

/// 適用ポリシーを環境変数から読み込み
///
/// # 環境変数
/// - `SYNC_APPLY_TIMEOUT_MS`: 1呼び出しのタイムアウト（デフォルト: 5000）
/// - `SYNC_MAX_RETRIES`: 一時的なエラーの最大再試行回数（デフォルト: 2）
/// - `SYNC_RETRY_BACKOFF_MS`: 最初の再試行までの待機（デフォルト: 100）
pub fn policy_from_env() -> Result<ApplyPolicy, ConfigError> {
    Ok(ApplyPolicy {
        timeout: Duration::from_millis(parse_or(
            "SYNC_APPLY_TIMEOUT_MS",
            DEFAULT_APPLY_TIMEOUT_MS,
        )?),
        max_retries: parse_or("SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
        retry_backoff: Duration::from_millis(parse_or(
            "SYNC_RETRY_BACKOFF_MS",
            DEFAULT_RETRY_BACKOFF_MS,
        )?),
    })
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// 未設定または空文字列なら`None`
fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
