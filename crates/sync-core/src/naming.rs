//! Destination container naming.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("Container prefix must not be empty")]
    EmptyPrefix,

    #[error("Invalid date suffix format '{0}'")]
    InvalidDateFormat(String),
}

/// Rule mapping a stream to the container its documents are written to.
///
/// The rule is pure: the same `(naming, stream, now)` always yields the same
/// name. Parts are joined with `-` and lowercased, since document stores
/// reject upper-case index names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNaming {
    /// Leading part of every container name
    pub prefix: String,
    /// Append the stream (audited table) name
    pub append_stream_name: bool,
    /// strftime format for a time-bucket suffix, e.g. `%Y.%m.%d`
    pub date_suffix_format: Option<String>,
}

impl ContainerNaming {
    pub fn new(
        prefix: impl Into<String>,
        append_stream_name: bool,
        date_suffix_format: Option<String>,
    ) -> Result<Self, NamingError> {
        let naming = Self {
            prefix: prefix.into(),
            append_stream_name,
            date_suffix_format,
        };
        naming.validate()?;
        Ok(naming)
    }

    /// Reject configurations that would make `container_for` fail.
    ///
    /// Formatting a `DelayedFormat` built from a bad format string panics on
    /// display, so formats are checked once here instead.
    pub fn validate(&self) -> Result<(), NamingError> {
        if self.prefix.trim().is_empty() {
            return Err(NamingError::EmptyPrefix);
        }
        if let Some(format) = &self.date_suffix_format {
            if format.is_empty() || StrftimeItems::new(format).any(|i| matches!(i, Item::Error))
            {
                return Err(NamingError::InvalidDateFormat(format.clone()));
            }
        }
        Ok(())
    }

    pub fn container_for(&self, stream: &str, now: DateTime<Utc>) -> String {
        let mut name = self.prefix.clone();
        if self.append_stream_name && !stream.is_empty() {
            name.push('-');
            name.push_str(stream);
        }
        if let Some(format) = &self.date_suffix_format {
            name.push('-');
            name.push_str(&now.format(format).to_string());
        }
        name.to_lowercase()
    }

    /// Pattern matching every container this rule can produce.
    pub fn search_pattern(&self) -> String {
        let mut pattern = self.prefix.to_lowercase();
        if self.append_stream_name || self.date_suffix_format.is_some() {
            pattern.push('*');
        }
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
    }

    #[test]
    fn test_prefix_only() {
        let naming = ContainerNaming::new("audit", false, None).unwrap();
        assert_eq!(naming.container_for("users", at()), "audit");
        assert_eq!(naming.search_pattern(), "audit");
    }

    #[test]
    fn test_stream_suffix() {
        let naming = ContainerNaming::new("audit", true, None).unwrap();
        assert_eq!(naming.container_for("Users", at()), "audit-users");
        assert_eq!(naming.search_pattern(), "audit*");
    }

    #[test]
    fn test_stream_and_date_suffix() {
        let naming = ContainerNaming::new("Audit", true, Some("%Y.%m".to_string())).unwrap();
        assert_eq!(naming.container_for("orders", at()), "audit-orders-2024.03");
        assert_eq!(naming.search_pattern(), "audit*");
    }

    #[test]
    fn test_date_suffix_only() {
        let naming = ContainerNaming::new("audit", false, Some("%Y-%m-%d".to_string())).unwrap();
        assert_eq!(naming.container_for("orders", at()), "audit-2024-03-01");
    }

    #[test]
    fn test_naming_is_deterministic() {
        let naming = ContainerNaming::new("audit", true, Some("%Y".to_string())).unwrap();
        assert_eq!(
            naming.container_for("users", at()),
            naming.container_for("users", at())
        );
    }

    #[test]
    fn test_invalid_date_format_is_rejected() {
        let err = ContainerNaming::new("audit", false, Some("%Q".to_string())).unwrap_err();
        assert!(matches!(err, NamingError::InvalidDateFormat(_)));
    }

    #[test]
    fn test_empty_prefix_is_rejected() {
        assert!(matches!(
            ContainerNaming::new(" ", true, None),
            Err(NamingError::EmptyPrefix)
        ));
    }
}
