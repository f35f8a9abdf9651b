//! Translation of failed service responses into typed errors.
//!
//! This is the only place that looks at status codes and error bodies.
//! Everything above it deals in [`ErrorDescriptor`] / [`ErrorKind`].

use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::ErrorKind;

/// Details used when the service gives no error body
const NO_EXPLANATION: &str = "The cloud provided an error code without explanation";
/// Code used when the service gives no machine readable code
const UNKNOWN_CODE: &str = "unknown";

const AUTHENTICATION_CODES: &[&str] = &[
    "notauthorized",
    "invalidcredentials",
    "authorizationfailed",
    "authschemenotallowed",
    "invalidauthenticationheader",
    "invalidkeyid",
    "invalidsignature",
    "keydoesnotexist",
    "accountblocked",
];

const THROTTLING_CODES: &[&str] = &["requestthrottled", "throttlederror"];

// Malformed requests are reported as communication failures
const MALFORMED_REQUEST_CODES: &[&str] = &[
    "requesttoolarge",
    "badrequest",
    "invalidargument",
    "invalidheader",
    "invalidversion",
    "missingparameter",
];

const NOT_FOUND_CODE: &str = "resourcenotfound";
const DIRECTORY_NOT_EMPTY_CODE: &str = "directorynotempty";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Typed description of one failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescriptor {
    kind: ErrorKind,
    status: StatusCode,
    code: String,
    details: String,
}

impl ErrorDescriptor {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine readable code as sent by the service, or `unknown`
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human readable explanation, or the raw body if it was not JSON
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Whether a delete was refused because the directory still has children
    pub fn is_directory_not_empty(&self) -> bool {
        self.code.eq_ignore_ascii_case(DIRECTORY_NOT_EMPTY_CODE)
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({:?}): {}",
            self.status.as_u16(),
            self.code,
            self.kind,
            self.details
        )
    }
}

/// Classify a failed response.
///
/// `lookup` marks GET/HEAD style calls where a missing entity is a valid
/// answer. For those, `None` is returned on not-found and the caller
/// reports absence instead of an error.
pub fn classify(status: StatusCode, body: &str, lookup: bool) -> Option<ErrorDescriptor> {
    if lookup && status == StatusCode::NOT_FOUND {
        return None;
    }

    let mut descriptor = ErrorDescriptor {
        kind: ErrorKind::General,
        status,
        code: UNKNOWN_CODE.to_string(),
        details: NO_EXPLANATION.to_string(),
    };

    if !body.trim().is_empty() {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => {
                if let Some(code) = parsed.code.map(|c| c.trim().to_string()) {
                    if !code.is_empty() {
                        descriptor.code = code;
                    }
                }
                descriptor.details = parsed
                    .message
                    .unwrap_or_else(|| format!("[{}] {}", status.as_u16(), descriptor.code));
            }
            Err(_) => {
                tracing::warn!(status = %status, "invalid JSON in error response: {}", body);
                descriptor.details = body.to_string();
            }
        }
    }

    let code = descriptor.code.to_lowercase();
    descriptor.kind = if AUTHENTICATION_CODES.contains(&code.as_str()) {
        ErrorKind::Authentication
    } else if THROTTLING_CODES.contains(&code.as_str()) {
        ErrorKind::Capacity
    } else if MALFORMED_REQUEST_CODES.contains(&code.as_str()) {
        ErrorKind::Communication
    } else if code == NOT_FOUND_CODE || status == StatusCode::NOT_FOUND {
        if lookup {
            return None;
        }
        ErrorKind::NotFound
    } else {
        ErrorKind::General
    };

    Some(descriptor)
}
