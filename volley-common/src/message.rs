//! The outbound message value type.
//!
//! A [`Message`] is created by the caller, is never mutated afterwards and is
//! consumed read-only when its wire form is built. Field names accept the
//! `to_email` / `text_content` / `html_content` / `custom_headers` spelling
//! used by existing message lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a message is rejected before any session interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The recipient cannot be placed in an envelope.
    #[error("Invalid recipient address: {0:?}")]
    InvalidRecipient(String),

    /// A custom header name is empty or contains illegal characters.
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// A custom header would duplicate one generated for every message.
    #[error("Header {0} is generated and cannot be set")]
    ReservedHeader(String),

    /// A custom header value contains a line break.
    #[error("Invalid value for header {0}")]
    InvalidHeaderValue(String),

    /// The subject contains a line break.
    #[error("Subject must not contain line breaks")]
    InvalidSubject,
}

/// Headers written for every message from its own fields.
const GENERATED_HEADERS: [&str; 6] = [
    "From",
    "To",
    "Subject",
    "MIME-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
];

/// A single outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "to_email", default)]
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(alias = "text_content", default)]
    text: String,
    #[serde(alias = "html_content", default)]
    html: Option<String>,
    #[serde(alias = "custom_headers", default)]
    headers: BTreeMap<String, String>,
}

impl Message {
    /// Creates a plain-text message.
    #[must_use]
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
            headers: BTreeMap::new(),
        }
    }

    /// Adds an HTML alternative body.
    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds a custom header. A later value for the same name replaces the
    /// earlier one.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    /// Custom headers, ordered by name.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Checks that the message can be turned into a wire message.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, checking the recipient, subject and
    /// text body before any custom headers.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.trim().is_empty() {
            return Err(ValidationError::MissingField("recipient"));
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingField("subject"));
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::MissingField("text body"));
        }

        if !self.to.contains('@') || has_line_break(&self.to) || self.to.contains(['<', '>']) {
            return Err(ValidationError::InvalidRecipient(self.to.clone()));
        }

        if has_line_break(&self.subject) {
            return Err(ValidationError::InvalidSubject);
        }

        for (name, value) in &self.headers {
            let valid_name = !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_graphic() && b != b':');
            if !valid_name {
                return Err(ValidationError::InvalidHeaderName(name.clone()));
            }
            if GENERATED_HEADERS
                .iter()
                .any(|generated| generated.eq_ignore_ascii_case(name))
            {
                return Err(ValidationError::ReservedHeader(name.clone()));
            }
            if has_line_break(value) {
                return Err(ValidationError::InvalidHeaderValue(name.clone()));
            }
        }

        Ok(())
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> Message {
        Message::new("rcpt@example.com", "Hello", "Plain body")
    }

    #[test]
    fn test_valid_message() {
        let message = sample()
            .with_html("<p>Hi</p>")
            .with_header("X-Campaign-ID", "launch");
        assert_eq!(message.validate(), Ok(()));
        assert_eq!(message.html(), Some("<p>Hi</p>"));
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            Message::new("", "Hello", "Body").validate(),
            Err(ValidationError::MissingField("recipient"))
        );
        assert_eq!(
            Message::new("rcpt@example.com", "  ", "Body").validate(),
            Err(ValidationError::MissingField("subject"))
        );
        assert_eq!(
            Message::new("rcpt@example.com", "Hello", "").validate(),
            Err(ValidationError::MissingField("text body"))
        );
    }

    #[test]
    fn test_recipient_injection_rejected() {
        let message = Message::new("rcpt@example.com\r\nRCPT TO:<x@y>", "Hello", "Body");
        assert!(matches!(
            message.validate(),
            Err(ValidationError::InvalidRecipient(_))
        ));

        let message = Message::new("no-at-sign", "Hello", "Body");
        assert!(matches!(
            message.validate(),
            Err(ValidationError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_header_validation() {
        let bad_name = sample().with_header("X-Bad:Name", "value");
        assert_eq!(
            bad_name.validate(),
            Err(ValidationError::InvalidHeaderName("X-Bad:Name".to_string()))
        );

        let bad_value = sample().with_header("X-Good", "line\r\nBcc: someone@example.com");
        assert_eq!(
            bad_value.validate(),
            Err(ValidationError::InvalidHeaderValue("X-Good".to_string()))
        );
    }

    #[test]
    fn test_generated_headers_rejected() {
        for name in ["From", "to", "SUBJECT", "Mime-Version", "content-type"] {
            assert_eq!(
                sample().with_header(name, "value").validate(),
                Err(ValidationError::ReservedHeader(name.to_string()))
            );
        }
        assert_eq!(sample().with_header("Reply-To", "a@example.com").validate(), Ok(()));
    }

    #[test]
    fn test_header_replaced_by_name() {
        let message = sample().with_header("X-Id", "1").with_header("X-Id", "2");
        assert_eq!(message.headers().len(), 1);
        assert_eq!(message.headers().get("X-Id").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let message: Message = ron::from_str(
            r#"(
                to_email: "rcpt@example.com",
                subject: "Test Email 1",
                text_content: "plain",
                html_content: Some("<h1>html</h1>"),
                custom_headers: { "X-Campaign-ID": "test-campaign" },
            )"#,
        )
        .unwrap();

        assert_eq!(message.to(), "rcpt@example.com");
        assert_eq!(message.html(), Some("<h1>html</h1>"));
        assert_eq!(
            message.headers().get("X-Campaign-ID").map(String::as_str),
            Some("test-campaign")
        );
    }

    #[test]
    fn test_deserialize_missing_subject_is_blank() {
        let message: Message =
            ron::from_str(r#"(to: "rcpt@example.com", text: "plain")"#).unwrap();
        assert_eq!(
            message.validate(),
            Err(ValidationError::MissingField("subject"))
        );
    }

    #[test]
    fn test_deserialize_missing_recipient_fails_alone() {
        let messages: Vec<Message> = ron::from_str(
            r#"[
                (to: "rcpt@example.com", subject: "One", text: "plain"),
                (subject: "Two", text: "plain"),
            ]"#,
        )
        .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].validate(), Ok(()));
        assert_eq!(
            messages[1].validate(),
            Err(ValidationError::MissingField("recipient"))
        );
    }
}
