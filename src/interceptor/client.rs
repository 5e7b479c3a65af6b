use tokio::time::Instant;
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;
use tonic::{Request, Status};
use tracing::debug;

use super::{Credential, TRACE_ID_KEY};

/// 调用方拿到的通道类型
pub type ClientChannel = InterceptedService<Channel, ClientInterceptor>;

/// 客户端拦截器
///
/// 按顺序写入：出站元数据（含追踪 ID）、认证凭证、`grpc-timeout`
#[derive(Debug, Clone, Default)]
pub struct ClientInterceptor {
    metadata: MetadataMap,
    credential: Option<Credential>,
    deadline: Option<Instant>,
}

impl ClientInterceptor {
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata,
            credential: None,
            deadline: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn wrap(self, channel: Channel) -> ClientChannel {
        InterceptedService::new(channel, self)
    }
}

impl Interceptor for ClientInterceptor {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        let metadata = req.metadata_mut();
        for entry in self.metadata.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    metadata.insert(key.clone(), value.clone());
                }
                KeyAndValueRef::Binary(key, value) => {
                    metadata.insert_bin(key.clone(), value.clone());
                }
            }
        }

        if let Some(credential) = &self.credential {
            credential.apply(metadata);
        }

        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Status::deadline_exceeded("deadline exceeded before send"));
            }
            if !req.metadata().contains_key("grpc-timeout") {
                req.set_timeout(remaining);
            }
        }

        debug!(
            trace_id = req.metadata().get(TRACE_ID_KEY).and_then(|v| v.to_str().ok()).unwrap_or(""),
            "outgoing grpc request"
        );

        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::BearerCredentialProvider;
    use crate::interceptor::CredentialProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn injects_metadata_credential_and_timeout() {
        let mut metadata = MetadataMap::new();
        metadata.insert(TRACE_ID_KEY, "trace-1".parse().unwrap());
        let credential = BearerCredentialProvider.credential(Some("tok"), false).unwrap();

        let mut interceptor = ClientInterceptor::new(metadata)
            .with_credential(Some(credential))
            .with_deadline(Instant::now() + Duration::from_secs(5));

        let req = interceptor.call(Request::new(())).unwrap();
        assert_eq!(req.metadata().get(TRACE_ID_KEY).unwrap(), "trace-1");
        assert_eq!(req.metadata().get("authorization").unwrap(), "Bearer tok");
        assert!(req.metadata().contains_key("grpc-timeout"));
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits() {
        let mut interceptor =
            ClientInterceptor::default().with_deadline(Instant::now());
        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }
}
