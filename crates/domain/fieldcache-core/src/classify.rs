use std::error::Error;
use std::io;

use crate::error::{ErrorCategory, RemoteError};

const NO_INTERNET_PHRASES: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "no such host",
    "unknown host",
    "unable to resolve host",
    "network is unreachable",
    "network unreachable",
    "no route to host",
    "host unreachable",
    "not connected to the internet",
    "no internet connection",
    "network is offline",
];

const UNAVAILABLE_PHRASES: &[&str] = &["service unavailable", "bad gateway", "connection refused"];
const TIMEOUT_PHRASES: &[&str] = &["timed out", "timeout", "deadline has elapsed"];
const AUTHN_PHRASES: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid token",
    "token required",
    "invalid credentials",
];
const AUTHZ_PHRASES: &[&str] = &["forbidden", "permission denied", "not authorized", "access denied"];

/// Maps raw failures onto [`ErrorCategory`]. Stateless and deterministic.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Walks the source chain; typed errors win over message patterns.
    pub fn classify(err: &(dyn Error + 'static)) -> ErrorCategory {
        let mut current: Option<&(dyn Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(category) = Self::classify_typed(e) {
                return category;
            }
            current = e.source();
        }

        let mut current: Option<&(dyn Error + 'static)> = Some(err);
        while let Some(e) = current {
            let category = Self::classify_message(&e.to_string());
            if category != ErrorCategory::Unknown {
                return category;
            }
            current = e.source();
        }
        ErrorCategory::Unknown
    }

    fn classify_typed(e: &(dyn Error + 'static)) -> Option<ErrorCategory> {
        if let Some(remote) = e.downcast_ref::<RemoteError>() {
            return match remote {
                RemoteError::Offline(_) => Some(ErrorCategory::NoInternet),
                RemoteError::Timeout(_) => Some(ErrorCategory::ServerTimeout),
                RemoteError::Http { status, .. } => Self::classify_status(i64::from(*status)),
                RemoteError::Service { code, .. } => Self::classify_status(*code),
                // Protocol text is produced locally and may quote service names or urls.
                RemoteError::Cancelled | RemoteError::Protocol(_) | RemoteError::Store(_) => {
                    Some(ErrorCategory::Unknown)
                }
            };
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::NotConnected => Some(ErrorCategory::NoInternet),
                io::ErrorKind::ConnectionRefused => Some(ErrorCategory::ServerUnavailable),
                io::ErrorKind::TimedOut => Some(ErrorCategory::ServerTimeout),
                io::ErrorKind::PermissionDenied => Some(ErrorCategory::AuthorizationFailed),
                _ => None,
            };
        }
        None
    }

    fn classify_status(code: i64) -> Option<ErrorCategory> {
        match code {
            401 | 498 | 499 => Some(ErrorCategory::AuthenticationFailed),
            403 => Some(ErrorCategory::AuthorizationFailed),
            502 | 503 => Some(ErrorCategory::ServerUnavailable),
            408 | 504 => Some(ErrorCategory::ServerTimeout),
            _ => None,
        }
    }

    /// Message fallback for errors that carry no usable type information.
    pub fn classify_message(message: &str) -> ErrorCategory {
        let lower = message.to_ascii_lowercase();
        let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has_code = |codes: &[&str]| tokens.iter().any(|t| codes.contains(t));

        if has_phrase(NO_INTERNET_PHRASES) {
            ErrorCategory::NoInternet
        } else if has_code(&["401", "498", "499"]) || has_phrase(AUTHN_PHRASES) {
            ErrorCategory::AuthenticationFailed
        } else if has_code(&["403"]) || has_phrase(AUTHZ_PHRASES) {
            ErrorCategory::AuthorizationFailed
        } else if has_code(&["502", "503"]) || has_phrase(UNAVAILABLE_PHRASES) {
            ErrorCategory::ServerUnavailable
        } else if has_code(&["408", "504"]) || has_phrase(TIMEOUT_PHRASES) {
            ErrorCategory::ServerTimeout
        } else {
            ErrorCategory::Unknown
        }
    }
}
