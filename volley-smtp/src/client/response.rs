//! SMTP reply parsing.

use std::fmt;

use super::error::{ClientError, Result};

/// One line of a (possibly multi-line) SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyLine {
    code: u16,
    /// `true` for the `250 ` line that terminates a reply, `false` for `250-`.
    is_last: bool,
    text: String,
}

/// A complete SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Convenience constructor for a single-line reply.
    #[must_use]
    pub fn single(code: u16, text: impl Into<String>) -> Self {
        Self::new(code, vec![text.into()])
    }

    /// The reply text with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// `421`: the server is closing the transmission channel.
    #[must_use]
    pub const fn is_service_closing(&self) -> bool {
        self.code == 421
    }

    /// Parses a single reply line: a three digit code followed by a space,
    /// a dash or nothing.
    fn parse_line(line: &str) -> Result<ReplyLine> {
        let Some(code_str) = line.get(..3) else {
            return Err(ClientError::ParseError(format!(
                "Response line too short: '{line}'"
            )));
        };

        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*other)
                )));
            }
        };

        Ok(ReplyLine {
            code,
            is_last,
            text: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Attempts to parse one complete reply from the front of `buffer`.
    ///
    /// Returns `Ok(None)` when more data is needed, otherwise the reply and
    /// the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` for malformed lines or a code that
    /// changes part way through a multi-line reply.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(offset) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + offset];
            consumed += offset + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                Some(expected) if expected != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => code = Some(parsed.code),
            }

            lines.push(parsed.text);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}
