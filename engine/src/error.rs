//! Error taxonomy and failure translation.
//!
//! Every broker failure crossing an operation boundary is classified into
//! [`ServiceBusError`] so the UI can show one actionable notification while
//! the raw diagnostic goes to the log. Classification is by failure signature
//! in the error text, with a generic fallback that keeps the raw message.

use thiserror::Error;

/// User-facing error classification for broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceBusError {
    #[error(
        "Cannot reach the Service Bus endpoint ({0}). Check your network connection, VPN and firewall rules."
    )]
    NetworkUnreachable(String),

    #[error(
        "Authentication failed ({0}). The shared access key may have been rotated or the SAS token expired - update the stored connection string."
    )]
    AuthenticationFailed(String),

    #[error(
        "The request signature is invalid ({0}). Verify the SharedAccessKeyName and SharedAccessKey values in the connection string."
    )]
    InvalidSignature(String),

    #[error("Entity not found ({0}). It may have been deleted or renamed - refresh the namespace.")]
    ResourceNotFound(String),

    #[error("The namespace is throttling requests ({0}). Wait a moment and try again.")]
    RateLimited(String),

    #[error(
        "Access denied ({0}). The shared access policy does not grant the rights this operation needs."
    )]
    PermissionDenied(String),

    /// Format-check failure raised before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("{operation} failed: {message}")]
    Generic { operation: String, message: String },
}

impl ServiceBusError {
    pub fn generic(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceBusError::Generic {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type ServiceBusResult<T> = Result<T, ServiceBusError>;

/// Classify a raw broker failure into the [`ServiceBusError`] taxonomy.
///
/// `operation` is a short human description ("purging queue 'orders'") used
/// in the fallback message when no known signature matches.
pub fn translate(operation: &str, error: impl std::fmt::Display) -> ServiceBusError {
    let raw = error.to_string();
    let lowered = raw.to_lowercase();

    if lowered.contains("enotfound")
        || lowered.contains("econnrefused")
        || lowered.contains("etimedout")
        || lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("dns error")
        || lowered.contains("network")
    {
        return ServiceBusError::NetworkUnreachable(raw);
    }
    if lowered.contains("malformed")
        || lowered.contains("invalid signature")
        || lowered.contains("signature did not match")
        || lowered.contains("failed to verify")
    {
        return ServiceBusError::InvalidSignature(raw);
    }
    if lowered.contains("unauthorized")
        || lowered.contains("401")
        || lowered.contains("token is expired")
        || lowered.contains("expiredtoken")
        || lowered.contains("put token failed")
    {
        return ServiceBusError::AuthenticationFailed(raw);
    }
    if lowered.contains("forbidden") || lowered.contains("403") {
        return ServiceBusError::PermissionDenied(raw);
    }
    if lowered.contains("messagingentitynotfound")
        || lowered.contains("not found")
        || lowered.contains("404")
        || lowered.contains("does not exist")
    {
        return ServiceBusError::ResourceNotFound(raw);
    }
    if lowered.contains("429")
        || lowered.contains("throttl")
        || lowered.contains("server busy")
        || lowered.contains("serverbusy")
    {
        return ServiceBusError::RateLimited(raw);
    }

    ServiceBusError::generic(operation, raw)
}

/// Map an HTTP status from the management API into the taxonomy.
pub fn from_status(operation: &str, status: u16, body: &str) -> ServiceBusError {
    match status {
        401 => ServiceBusError::AuthenticationFailed(format!("HTTP 401: {body}")),
        403 => ServiceBusError::PermissionDenied(format!("HTTP 403: {body}")),
        404 => ServiceBusError::ResourceNotFound(format!("HTTP 404: {body}")),
        429 => ServiceBusError::RateLimited(format!("HTTP 429: {body}")),
        _ => ServiceBusError::generic(operation, format!("HTTP {status}: {body}")),
    }
}

const STORAGE_MARKERS: [&str; 3] = ["AccountName=", "AccountKey=", "DefaultEndpointsProtocol="];

/// Check the structural shape of a connection string before any network call.
///
/// A connection string copied from an Azure Storage account is a common
/// misconfiguration and gets its own message instead of the generic format
/// error.
pub fn validate_connection_string(connection_string: &str) -> ServiceBusResult<()> {
    let trimmed = connection_string.trim();
    if trimmed.is_empty() {
        return Err(ServiceBusError::Validation(
            "Connection string is empty.".to_string(),
        ));
    }

    if STORAGE_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return Err(ServiceBusError::Validation(
            "This looks like an Azure Storage connection string, not a Service Bus one. \
             Copy the connection string from the namespace's Shared access policies blade."
                .to_string(),
        ));
    }

    if !trimmed.contains("Endpoint=sb://") {
        return Err(ServiceBusError::Validation(
            "Connection string is missing 'Endpoint=sb://...'.".to_string(),
        ));
    }

    let has_sas = trimmed.contains("SharedAccessSignature=");
    if !has_sas {
        if !trimmed.contains("SharedAccessKeyName=") {
            return Err(ServiceBusError::Validation(
                "Connection string is missing 'SharedAccessKeyName='.".to_string(),
            ));
        }
        if !trimmed.contains("SharedAccessKey=") {
            return Err(ServiceBusError::Validation(
                "Connection string is missing 'SharedAccessKey='.".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    const VALID: &str =
        "Endpoint=sb://demo.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=abc123=";

    #[test]
    fn translate_classifies_network_failures() {
        let err = translate("peeking messages", "getaddrinfo ENOTFOUND demo.servicebus.windows.net");
        assert!(matches!(err, ServiceBusError::NetworkUnreachable(_)));

        let err = translate("peeking messages", "operation timed out after 30s");
        assert!(matches!(err, ServiceBusError::NetworkUnreachable(_)));
    }

    #[test]
    fn translate_classifies_auth_and_signature() {
        let err = translate("listing queues", "401 Unauthorized: token is expired");
        assert!(matches!(err, ServiceBusError::AuthenticationFailed(_)));

        let err = translate("listing queues", "MalformedToken: signature did not match");
        assert!(matches!(err, ServiceBusError::InvalidSignature(_)));
    }

    #[test]
    fn translate_classifies_not_found_throttle_forbidden() {
        assert!(matches!(
            translate("op", "MessagingEntityNotFound: queue gone"),
            ServiceBusError::ResourceNotFound(_)
        ));
        assert!(matches!(
            translate("op", "ServerBusy: please retry"),
            ServiceBusError::RateLimited(_)
        ));
        assert!(matches!(
            translate("op", "403 Forbidden"),
            ServiceBusError::PermissionDenied(_)
        ));
    }

    #[test]
    fn translate_falls_back_to_generic_with_raw_text() {
        let err = translate("transferring dead letters", "amqp link detached unexpectedly");
        match err {
            ServiceBusError::Generic { operation, message } => {
                assert_eq!(operation, "transferring dead letters");
                assert!(message.contains("amqp link detached"));
            }
            other => panic!("expected Generic, got {other:?}"),
        }
    }

    #[test]
    fn valid_connection_string_passes() {
        assert_ok!(validate_connection_string(VALID));
    }

    #[test]
    fn sas_connection_string_passes_without_key_name() {
        assert_ok!(validate_connection_string(
            "Endpoint=sb://demo.servicebus.windows.net/;SharedAccessSignature=SharedAccessSignature sr=x&sig=y&se=1&skn=z"
        ));
    }

    #[test]
    fn missing_markers_are_rejected() {
        assert_err!(validate_connection_string(""));
        assert_err!(validate_connection_string("Endpoint=sb://demo.servicebus.windows.net/"));
        assert_err!(validate_connection_string(
            "Endpoint=sb://demo.servicebus.windows.net/;SharedAccessKeyName=Root"
        ));
    }

    #[test]
    fn storage_connection_string_gets_wrong_product_error() {
        let err = validate_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=mystore;AccountKey=abc==;EndpointSuffix=core.windows.net",
        )
        .unwrap_err();
        match err {
            ServiceBusError::Validation(msg) => {
                assert!(msg.contains("Azure Storage"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn display_messages_carry_guidance() {
        let err = ServiceBusError::AuthenticationFailed("401".to_string());
        assert!(err.to_string().contains("shared access key"));

        let err = ServiceBusError::generic("purging queue 'orders'", "link closed");
        assert_eq!(err.to_string(), "purging queue 'orders' failed: link closed");
    }
}
