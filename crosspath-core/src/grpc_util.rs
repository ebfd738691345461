use tonic::{Code, Response, Status};
use tonic_types::{ErrorDetails, StatusExt};

use crate::error::Error;

/// Send error message of bad request for grpc request.
pub fn send_bad_request_error<T>(
    field: impl Into<String>,
    description: impl Into<String>,
) -> Result<Response<T>, Status> {
    let mut err_details = ErrorDetails::new();
    err_details.add_bad_request_violation(field, description);

    let status = Status::with_error_details(
        Code::InvalidArgument,
        "request contains invalid arguments",
        err_details,
    );

    Err(status)
}

/// Build an error status with details attached.
pub fn get_error_status(s: impl Into<String>) -> Status {
    let s1: String = s.into();

    let mut err_details = ErrorDetails::new();

    let metadata: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    err_details.set_error_info("error", s1.clone(), metadata);

    Status::with_error_details(Code::Internal, s1.clone(), err_details)
}

/// Send error message of internal error for grpc request.
pub fn send_error_message<T>(s: impl Into<String>) -> Result<Response<T>, Status> {
    Err(get_error_status(s))
}

/// Map an error kind onto the matching grpc status code.
pub fn error_to_status(e: &Error) -> Status {
    let code = match e {
        Error::InvalidConfig(_) => Code::InvalidArgument,
        Error::Internal(_) => Code::Internal,
        Error::Serialization(_) => Code::Internal,
        Error::Unavailable(_) => Code::Unavailable,
    };

    let mut err_details = ErrorDetails::new();
    let metadata: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    err_details.set_error_info("error", e.to_string(), metadata);

    Status::with_error_details(code, e.to_string(), err_details)
}

/// Classify a failed peer call: a down peer is recoverable at the caller's
/// discretion, everything else is internal.
pub fn status_to_error(status: Status) -> Error {
    match status.code() {
        Code::Unavailable => Error::Unavailable(status.message().to_string()),
        code => Error::Internal(format!("{:?}: {}", code, status.message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_keeps_the_kind() {
        let error = status_to_error(Status::unavailable("worker down"));
        assert!(matches!(error, Error::Unavailable(_)));
        assert_eq!(error_to_status(&error).code(), Code::Unavailable);

        let error = status_to_error(Status::internal("iterator failed"));
        assert!(matches!(error, Error::Internal(_)));
        assert_eq!(error_to_status(&error).code(), Code::Internal);
    }
}
