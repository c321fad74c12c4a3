//! Builds the RFC 5322 / MIME text that is sent after DATA.

use std::{
    collections::BTreeMap,
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use volley_common::Message;

/// Builder for constructing email messages with proper MIME formatting.
///
/// A text body on its own produces a single `text/plain` part. Adding an
/// HTML body produces `multipart/alternative` with the text part first, so
/// clients that can render HTML prefer it.
///
/// # Examples
///
/// ```
/// use volley_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .text("This is the message body")
///     .build();
///
/// assert!(message.contains("Subject: Hello\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: BTreeMap<String, String>,
    text: Option<String>,
    html: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a builder from an outbound [`Message`] and the envelope
    /// sender used for it.
    #[must_use]
    pub fn outbound(sender: &str, message: &Message) -> Self {
        let mut builder = Self::new()
            .from(sender)
            .to(message.to())
            .subject(message.subject())
            .text(message.text());

        if let Some(html) = message.html() {
            builder = builder.html(html);
        }

        for (name, value) in message.headers() {
            builder = builder.header(name, value);
        }

        builder
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header, replacing any earlier header of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.text = Some(content.into());
        self
    }

    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    /// Renders the message with CRLF line endings.
    #[must_use]
    pub fn build(self) -> String {
        let mut message = String::with_capacity(1024);

        if let Some(from) = &self.from {
            let _ = write!(message, "From: {from}\r\n");
        }
        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", self.to.join(", "));
        }
        if let Some(subject) = &self.subject {
            let _ = write!(message, "Subject: {}\r\n", encode_header_value(subject));
        }
        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {}\r\n", encode_header_value(value));
        }
        message.push_str("MIME-Version: 1.0\r\n");

        let text = self.text.as_deref().unwrap_or_default();
        match &self.html {
            None => write_part(&mut message, "text/plain", text),
            Some(html) => {
                let boundary = generate_boundary();
                let _ = write!(
                    message,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );
                let _ = write!(message, "--{boundary}\r\n");
                write_part(&mut message, "text/plain", text);
                let _ = write!(message, "--{boundary}\r\n");
                write_part(&mut message, "text/html", html);
                let _ = write!(message, "--{boundary}--\r\n");
            }
        }

        message
    }
}

/// Writes the part headers, a blank line and the encoded body.
fn write_part(message: &mut String, content_type: &str, body: &str) {
    let _ = write!(message, "Content-Type: {content_type}; charset=utf-8\r\n");

    if body.is_ascii() {
        message.push_str("Content-Transfer-Encoding: 7bit\r\n\r\n");
        for line in body.lines() {
            message.push_str(line);
            message.push_str("\r\n");
        }
    } else {
        message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        let encoded = STANDARD.encode(body.as_bytes());
        for chunk in encoded.as_bytes().chunks(76) {
            // The base64 alphabet is ASCII
            message.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            message.push_str("\r\n");
        }
    }
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Generates a MIME boundary unique within this process.
fn generate_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("----=_Part_{timestamp}_{sequence}")
}
