//! 调用凭证
//!
//! 由不透明的认证 token 派生每次调用携带的凭证元数据

use std::fmt;

use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::error::{ClientError, Result};

/// 单次调用附带的凭证
#[derive(Clone, Default)]
pub struct Credential {
    headers: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
    require_transport_security: bool,
}

impl Credential {
    /// 不携带任何认证头的凭证（由服务端或下游自行鉴权）
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// `authorization: Bearer <token>`
    pub fn bearer(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ClientError::configuration("auth token is empty"));
        }
        let mut value: AsciiMetadataValue = format!("Bearer {}", token)
            .parse()
            .map_err(|_| ClientError::configuration("auth token is not valid metadata"))?;
        value.set_sensitive(true);

        Ok(Self {
            headers: vec![(AsciiMetadataKey::from_static("authorization"), value)],
            require_transport_security: false,
        })
    }

    /// 只允许在 TLS 连接上发送
    #[must_use]
    pub fn with_transport_security(mut self) -> Self {
        self.require_transport_security = true;
        self
    }

    pub fn require_transport_security(&self) -> bool {
        self.require_transport_security
    }

    pub fn is_anonymous(&self) -> bool {
        self.headers.is_empty()
    }

    /// 写入出站元数据
    pub fn apply(&self, metadata: &mut MetadataMap) {
        for (key, value) in &self.headers {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("headers", &self.headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("require_transport_security", &self.require_transport_security)
            .finish()
    }
}

/// 凭证提供方
pub trait CredentialProvider: Send + Sync {
    /// `token` 为空表示调用方没有传入 token；`secure` 表示连接是否使用 TLS
    fn credential(&self, token: Option<&str>, secure: bool) -> Result<Credential>;
}

/// Bearer token 凭证，TLS 连接上使用要求传输安全的版本
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerCredentialProvider;

impl CredentialProvider for BearerCredentialProvider {
    fn credential(&self, token: Option<&str>, secure: bool) -> Result<Credential> {
        let credential = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Credential::bearer(token)?,
            None => Credential::anonymous(),
        };
        Ok(if secure {
            credential.with_transport_security()
        } else {
            credential
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_credential_sets_authorization() {
        let credential = BearerCredentialProvider.credential(Some("abc123"), false).unwrap();
        let mut metadata = MetadataMap::new();
        credential.apply(&mut metadata);

        assert_eq!(metadata.get("authorization").unwrap(), "Bearer abc123");
        assert!(!credential.require_transport_security());
    }

    #[test]
    fn secure_connection_gets_tls_variant() {
        let credential = BearerCredentialProvider.credential(Some("abc123"), true).unwrap();
        assert!(credential.require_transport_security());
    }

    #[test]
    fn missing_token_gives_anonymous_credential() {
        for token in [None, Some(""), Some("   ")] {
            let credential = BearerCredentialProvider.credential(token, false).unwrap();
            let mut metadata = MetadataMap::new();
            credential.apply(&mut metadata);

            assert!(credential.is_anonymous());
            assert!(metadata.get("authorization").is_none());
        }
    }

    #[test]
    fn empty_bearer_token_is_rejected() {
        assert!(matches!(
            Credential::bearer("  "),
            Err(ClientError::Configuration(_))
        ));
    }
}
