// Infrastructure layer modules
pub mod config;
pub mod logging;
pub mod memory_target;
pub mod sql;
pub mod ssm_ops;
pub mod target_adapter;

// Re-exports
pub use config::{
    mapping_from_env, policy_from_env, ConfigError, PasswordSource, SyncConfig, TargetConfig,
    TargetKind,
};
pub use logging::{init_cli_logging, init_logging};
pub use memory_target::{FaultMode, MemoryTarget};
pub use sql::{build_sql_targets, MySqlTarget, PostgresTarget};
pub use ssm_ops::{AwsSsmOps, SsmOps, SsmOpsError};
pub use target_adapter::{ApplyPolicy, TargetHandle, TargetSession, TargetStore, WriteEffect};
