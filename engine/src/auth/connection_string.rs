use crate::error::{ServiceBusError, ServiceBusResult, validate_connection_string};

/// Components extracted from a Service Bus connection string.
///
/// The data plane consumes the raw string as-is; this parsed form feeds the
/// management API, which needs the namespace host and signing key separately.
#[derive(Debug, Clone)]
pub struct ParsedConnectionString {
    /// Namespace host, e.g. `demo.servicebus.windows.net`.
    pub fully_qualified_namespace: String,
    pub key_name: String,
    pub key: String,
}

impl ParsedConnectionString {
    /// Parses `Endpoint`, `SharedAccessKeyName` and `SharedAccessKey` out of
    /// a connection string, after validating its overall shape.
    pub fn parse(connection_string: &str) -> ServiceBusResult<Self> {
        validate_connection_string(connection_string)?;

        let mut namespace = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some(endpoint) = part.strip_prefix("Endpoint=") {
                // "sb://demo.servicebus.windows.net/" -> host between "://" and "/"
                if let Some(scheme_end) = endpoint.find("://") {
                    let host = &endpoint[scheme_end + 3..];
                    let host = host.trim_end_matches('/');
                    if !host.is_empty() {
                        namespace = Some(host.to_string());
                    }
                }
            } else if let Some(kn) = part.strip_prefix("SharedAccessKeyName=") {
                key_name = Some(kn.to_string());
            } else if let Some(k) = part.strip_prefix("SharedAccessKey=") {
                key = Some(k.to_string());
            }
        }

        let fully_qualified_namespace = namespace.ok_or_else(|| {
            ServiceBusError::Validation(
                "Connection string endpoint does not contain a namespace host.".to_string(),
            )
        })?;
        let key_name = key_name.ok_or_else(|| {
            ServiceBusError::Validation(
                "Connection string is missing 'SharedAccessKeyName='.".to_string(),
            )
        })?;
        let key = key.ok_or_else(|| {
            ServiceBusError::Validation(
                "Connection string is missing 'SharedAccessKey='.".to_string(),
            )
        })?;

        Ok(Self {
            fully_qualified_namespace,
            key_name,
            key,
        })
    }

    /// Short namespace name (host with its domain suffix stripped), used for
    /// display and secret-store keys.
    pub fn namespace_name(&self) -> &str {
        self.fully_qualified_namespace
            .split('.')
            .next()
            .unwrap_or(&self.fully_qualified_namespace)
    }

    /// Base URL of the namespace's management endpoint.
    pub fn management_base_url(&self) -> String {
        format!("https://{}", self.fully_qualified_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_err;

    #[test]
    fn parses_all_components() {
        let parsed = ParsedConnectionString::parse(
            "Endpoint=sb://demo.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0a2V5",
        )
        .unwrap();
        assert_eq!(parsed.fully_qualified_namespace, "demo.servicebus.windows.net");
        assert_eq!(parsed.key_name, "RootManageSharedAccessKey");
        assert_eq!(parsed.key, "c2VjcmV0a2V5");
        assert_eq!(parsed.namespace_name(), "demo");
        assert_eq!(
            parsed.management_base_url(),
            "https://demo.servicebus.windows.net"
        );
    }

    #[test]
    fn tolerates_whitespace_and_trailing_semicolons() {
        let parsed = ParsedConnectionString::parse(
            " Endpoint=sb://demo.servicebus.windows.net/ ; SharedAccessKeyName=Root ; SharedAccessKey=a2V5 ; ",
        )
        .unwrap();
        assert_eq!(parsed.key_name, "Root");
    }

    #[test]
    fn rejects_string_without_host() {
        assert_err!(ParsedConnectionString::parse(
            "Endpoint=sb:///;SharedAccessKeyName=Root;SharedAccessKey=a2V5"
        ));
    }
}
