//! SSM操作モジュール
//!
//! DBパスワードをSSM Parameter Store（SecureString）から取得する。
//! コールドスタート時に一度だけ呼び出す。

use async_trait::async_trait;
use aws_sdk_ssm::operation::get_parameter::GetParameterError;
use aws_sdk_ssm::Client as SsmClient;
use thiserror::Error;
use tracing::info;

/// SSM操作のエラー型
#[derive(Debug, Error)]
pub enum SsmOpsError {
    /// AWS SDK エラー
    #[error("AWS SSM APIエラー: {0}")]
    AwsSdkError(String),
    /// パラメータが存在しない、または値が空
    #[error("パラメータが見つかりません: {0}")]
    ParameterNotFound(String),
}

/// SSM操作トレイト（テスト用の抽象化）
#[async_trait]
pub trait SsmOps: Send + Sync {
    /// SecureStringパラメータを復号して取得する
    ///
    /// # 引数
    /// * `name` - パラメータ名（例: "/stream-sync/mysql/password"）
    async fn get_secure_parameter(&self, name: &str) -> Result<String, SsmOpsError>;
}

/// 実際のAWS SSM SDKを使用したSSM操作実装
pub struct AwsSsmOps {
    client: SsmClient,
}

impl AwsSsmOps {
    /// 新しいAwsSsmOpsを作成
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SsmClient::new(&config);
        Self::new(client)
    }
}

#[async_trait]
impl SsmOps for AwsSsmOps {
    async fn get_secure_parameter(&self, name: &str) -> Result<String, SsmOpsError> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| classify_get_parameter_error(name, e.into_service_error()))?;

        let value = response
            .parameter()
            .and_then(|p| p.value())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SsmOpsError::ParameterNotFound(name.to_string()))?;

        // 値そのものはログに出さない
        info!(parameter = %name, "Parameter Storeから取得");
        Ok(value.to_string())
    }
}

fn classify_get_parameter_error(name: &str, err: GetParameterError) -> SsmOpsError {
    match err {
        GetParameterError::ParameterNotFound(_) => SsmOpsError::ParameterNotFound(name.to_string()),
        other => SsmOpsError::AwsSdkError(format!("get_parameter失敗: {}", other)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// テスト用のモックSSM操作
    #[derive(Default)]
    pub(crate) struct MockSsmOps {
        parameters: HashMap<String, String>,
    }

    impl MockSsmOps {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_parameter(mut self, name: &str, value: &str) -> Self {
            self.parameters.insert(name.to_string(), value.to_string());
            self
        }
    }

    #[async_trait]
    impl SsmOps for MockSsmOps {
        async fn get_secure_parameter(&self, name: &str) -> Result<String, SsmOpsError> {
            self.parameters
                .get(name)
                .cloned()
                .ok_or_else(|| SsmOpsError::ParameterNotFound(name.to_string()))
        }
    }

    #[tokio::test]
    async fn test_mock_returns_parameter() {
        let ssm = MockSsmOps::new().with_parameter("/a", "secret");
        assert_eq!(ssm.get_secure_parameter("/a").await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn test_mock_missing_parameter() {
        let ssm = MockSsmOps::new();
        assert!(matches!(
            ssm.get_secure_parameter("/missing").await,
            Err(SsmOpsError::ParameterNotFound(name)) if name == "/missing"
        ));
    }

    #[test]
    fn test_parameter_not_found_is_classified() {
        use aws_sdk_ssm::types::error::{InvalidKeyId, ParameterNotFound};

        let err = GetParameterError::ParameterNotFound(ParameterNotFound::builder().build());
        assert!(matches!(
            classify_get_parameter_error("/sync/pg", err),
            SsmOpsError::ParameterNotFound(name) if name == "/sync/pg"
        ));

        let err = GetParameterError::InvalidKeyId(InvalidKeyId::builder().build());
        assert!(matches!(
            classify_get_parameter_error("/sync/pg", err),
            SsmOpsError::AwsSdkError(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let error = SsmOpsError::ParameterNotFound("/sync/pg".to_string());
        assert!(error.to_string().contains("/sync/pg"));

        let error = SsmOpsError::AwsSdkError("denied".to_string());
        assert!(error.to_string().contains("AWS SSM"));
    }
}
