//! gRPC 错误处理
//!
//! 提供 gRPC 状态与 ClientError 之间的转换。业务错误通过 `error-code`
//! 元数据在服务间传递，携带该元数据的状态会被识别为业务错误。

use super::{ApplicationError, ClientError, ErrorBuilder, ErrorCode};
use tonic::{Code, Status};

/// 业务错误代码元数据键
pub const ERROR_CODE_KEY: &str = "error-code";

/// 业务错误详情元数据键
pub const ERROR_DETAILS_KEY: &str = "error-details";

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => return ClientError::Cancelled,
            Code::DeadlineExceeded => return ClientError::DeadlineExceeded,
            _ => {}
        }

        match decode_application_error(&status) {
            Some(err) => ClientError::Application(err),
            None => ClientError::Status(status),
        }
    }
}

/// 从状态元数据中还原业务错误
fn decode_application_error(status: &Status) -> Option<ApplicationError> {
    let metadata = status.metadata();
    let raw = metadata.get(ERROR_CODE_KEY)?.to_str().ok()?;
    let code = raw
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(ErrorCode::from_u32)
        .unwrap_or(ErrorCode::UnknownError);

    let mut builder = ErrorBuilder::new(code, status.message());
    if let Some(details) = metadata.get(ERROR_DETAILS_KEY).and_then(|v| v.to_str().ok()) {
        builder = builder.details(details);
    }
    Some(builder.build())
}

impl From<ApplicationError> for Status {
    fn from(err: ApplicationError) -> Self {
        let mut status = Status::new(map_error_code_to_grpc(err.code), err.reason);

        if let Some(details) = err.details {
            if let Ok(value) = details.parse() {
                status.metadata_mut().insert(ERROR_DETAILS_KEY, value);
            }
        }

        if let Ok(value) = err.code.as_u32().to_string().parse() {
            status.metadata_mut().insert(ERROR_CODE_KEY, value);
        }

        status
    }
}

impl From<ClientError> for Status {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Application(app) => app.into(),
            ClientError::Status(status) => status,
            ClientError::Cancelled => Status::cancelled("call cancelled"),
            ClientError::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            ClientError::Configuration(msg) => Status::failed_precondition(msg),
            other => Status::unavailable(other.to_string()),
        }
    }
}

/// 将错误代码映射到 gRPC 状态码
fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::AuthenticationFailed => Code::Unauthenticated,
        ErrorCode::PermissionDenied => Code::PermissionDenied,
        ErrorCode::InvalidParameter => Code::InvalidArgument,
        ErrorCode::NotFound => Code::NotFound,
        ErrorCode::AlreadyExists => Code::AlreadyExists,
        ErrorCode::ResourceExhausted => Code::ResourceExhausted,

        ErrorCode::ServiceUnavailable
        | ErrorCode::NetworkError
        | ErrorCode::ConnectionFailed
        | ErrorCode::ConnectionClosed
        | ErrorCode::NoAvailableAddress
        | ErrorCode::RetryExhausted => Code::Unavailable,

        ErrorCode::ConnectionTimeout | ErrorCode::NetworkTimeout | ErrorCode::OperationTimeout => {
            Code::DeadlineExceeded
        }

        ErrorCode::OperationCancelled => Code::Cancelled,

        ErrorCode::InternalError
        | ErrorCode::ConfigurationError
        | ErrorCode::DiscoveryFailed => Code::Internal,

        _ => Code::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{Disposition, classify};

    #[test]
    fn plain_status_is_not_application_error() {
        let err = ClientError::from(Status::unavailable("connection reset"));
        assert!(matches!(err, ClientError::Status(_)));
        assert_eq!(classify(&err), Disposition::Retry);
    }

    #[test]
    fn cancelled_and_deadline_statuses_are_terminal() {
        assert!(matches!(
            ClientError::from(Status::cancelled("gone")),
            ClientError::Cancelled
        ));
        assert!(matches!(
            ClientError::from(Status::deadline_exceeded("late")),
            ClientError::DeadlineExceeded
        ));
    }

    #[test]
    fn application_error_survives_the_wire() {
        let app_err = ApplicationError::new(ErrorCode::NotFound, "order missing")
            .with_details("order_id=42");
        let status: Status = app_err.into();
        assert_eq!(status.code(), Code::NotFound);

        match ClientError::from(status) {
            ClientError::Application(err) => {
                assert_eq!(err.code, ErrorCode::NotFound);
                assert_eq!(err.reason, "order missing");
                assert_eq!(err.details.as_deref(), Some("order_id=42"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn unknown_numeric_code_still_marks_application_error() {
        let mut status = Status::internal("boom");
        status
            .metadata_mut()
            .insert(ERROR_CODE_KEY, "123456".parse().unwrap());
        let err = ClientError::from(status);
        assert!(err.is_application());
        assert_eq!(err.code(), ErrorCode::UnknownError);
    }
}
