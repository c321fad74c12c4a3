//! The connection primitive a session is built on.
//!
//! A [`Connector`] establishes connections; each connection is a
//! [`Transport`] exposing one method per protocol step. Every step returns
//! the server's reply unchanged: deciding whether a reply code is acceptable
//! belongs to the caller. Errors are reserved for failures of the connection
//! itself (I/O, timeouts, TLS, malformed replies).

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tokio_rustls::TlsConnector;
use volley_common::{internal, tracing};

use crate::{
    client::{ClientError, Response, SmtpClient, tls},
    config::{ClientTimeouts, Credentials, SmtpConfig},
};

/// Opens new connections to a fixed server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// Establishes a connection and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// greeting cannot be read.
    async fn connect(&self) -> Result<(Self::Transport, Response), ClientError>;

    /// Upper bound on [`Self::connect`], enforced by the caller.
    fn connect_timeout(&self) -> Duration;
}

/// One live connection.
#[async_trait]
pub trait Transport: Send {
    /// EHLO
    async fn identify(&mut self) -> Result<Response, ClientError>;

    /// STARTTLS and, if accepted, the TLS handshake
    async fn upgrade_secure(&mut self) -> Result<Response, ClientError>;

    /// SMTP AUTH with the given credentials
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<Response, ClientError>;

    /// MAIL FROM
    async fn declare_sender(&mut self, address: &str) -> Result<Response, ClientError>;

    /// RCPT TO
    async fn declare_recipient(&mut self, address: &str) -> Result<Response, ClientError>;

    /// DATA followed by the content. A non-`354` reply to DATA is returned
    /// as-is without sending the content.
    async fn transmit_content(&mut self, content: &str) -> Result<Response, ClientError>;

    /// RSET
    async fn reset(&mut self) -> Result<Response, ClientError>;

    /// QUIT
    async fn shutdown(&mut self) -> Result<Response, ClientError>;

    /// Extensions advertised in the most recent EHLO reply.
    fn capabilities(&self) -> &Capabilities;
}

/// ESMTP extensions advertised by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<String>,
    auth_mechanisms: Vec<String>,
}

impl Capabilities {
    /// Parses an EHLO reply. The first line is the server's name and is
    /// skipped.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self::default();

        for line in response.lines.iter().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();

            if keyword == "AUTH" {
                capabilities
                    .auth_mechanisms
                    .extend(words.map(str::to_ascii_uppercase));
            }
            capabilities.keywords.push(keyword);
        }

        capabilities
    }

    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth_mechanisms
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}

/// Connects to the server described by an [`SmtpConfig`].
#[derive(Clone)]
pub struct SmtpConnector {
    config: SmtpConfig,
    tls: Option<TlsConnector>,
}

impl SmtpConnector {
    /// Prepares the TLS connector up front when STARTTLS is configured, so
    /// connections share one trust store.
    ///
    /// # Errors
    ///
    /// Fails if the TLS configuration cannot be built.
    pub fn new(config: SmtpConfig) -> Result<Self, ClientError> {
        let tls = if config.starttls {
            if config.accept_invalid_certs {
                tracing::warn!(
                    server = %config.address(),
                    "SECURITY WARNING: TLS certificate validation is disabled for this connection"
                );
            }
            Some(tls::connector(config.accept_invalid_certs)?)
        } else {
            None
        };

        Ok(Self { config, tls })
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    type Transport = SmtpTransport;

    async fn connect(&self) -> Result<(SmtpTransport, Response), ClientError> {
        let address = self.config.address();
        internal!("Connecting to {}", address);

        let mut client =
            SmtpClient::connect(&address, self.config.server_domain().to_string()).await?;
        if let Some(connector) = &self.tls {
            client = client.with_tls(connector.clone());
        }
        let greeting = client.read_greeting().await?;

        Ok((
            SmtpTransport {
                client,
                helo_domain: self.config.helo_domain.clone(),
                timeouts: self.config.timeouts.clone(),
                capabilities: Capabilities::default(),
            },
            greeting,
        ))
    }

    fn connect_timeout(&self) -> Duration {
        self.config.timeouts.connect()
    }
}

/// A [`Transport`] over a real SMTP connection. Every step is bounded by the
/// matching [`ClientTimeouts`] entry.
pub struct SmtpTransport {
    client: SmtpClient,
    helo_domain: String,
    timeouts: ClientTimeouts,
    capabilities: Capabilities,
}

impl SmtpTransport {
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.client.is_tls()
    }
}

async fn bounded<T>(
    step: &str,
    secs: u64,
    future: impl Future<Output = Result<T, ClientError>> + Send,
) -> Result<T, ClientError> {
    let limit = Duration::from_secs(secs);
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ClientError::Timeout(format!("{step} timed out after {limit:?}")))?
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn identify(&mut self) -> Result<Response, ClientError> {
        let response = bounded(
            "EHLO",
            self.timeouts.ehlo_secs,
            self.client.ehlo(&self.helo_domain),
        )
        .await?;

        if response.is_success() {
            self.capabilities = Capabilities::from_ehlo(&response);
        }
        Ok(response)
    }

    async fn upgrade_secure(&mut self) -> Result<Response, ClientError> {
        if !self.capabilities.supports("STARTTLS") {
            return Err(ClientError::Unsupported("STARTTLS"));
        }

        let response = bounded(
            "STARTTLS",
            self.timeouts.starttls_secs,
            self.client.starttls(),
        )
        .await?;

        if response.is_success() {
            // RFC 3207: forget everything learned before the handshake
            self.capabilities = Capabilities::default();
        }
        Ok(response)
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<Response, ClientError> {
        let username = credentials.username.as_str();
        let password = credentials.password();

        if !self.capabilities.supports_auth("PLAIN") && self.capabilities.supports_auth("LOGIN") {
            bounded(
                "AUTH LOGIN",
                self.timeouts.auth_secs,
                self.client.auth_login(username, password),
            )
            .await
        } else {
            bounded(
                "AUTH PLAIN",
                self.timeouts.auth_secs,
                self.client.auth_plain(username, password),
            )
            .await
        }
    }

    async fn declare_sender(&mut self, address: &str) -> Result<Response, ClientError> {
        bounded(
            "MAIL FROM",
            self.timeouts.mail_from_secs,
            self.client.mail_from(address),
        )
        .await
    }

    async fn declare_recipient(&mut self, address: &str) -> Result<Response, ClientError> {
        bounded(
            "RCPT TO",
            self.timeouts.rcpt_to_secs,
            self.client.rcpt_to(address),
        )
        .await
    }

    async fn transmit_content(&mut self, content: &str) -> Result<Response, ClientError> {
        let data_secs = self.timeouts.data_secs;

        let response = bounded("DATA", data_secs, self.client.data()).await?;
        if response.code != 354 {
            return Ok(response);
        }

        bounded("message content", data_secs, self.client.send_data(content)).await
    }

    async fn reset(&mut self) -> Result<Response, ClientError> {
        bounded("RSET", self.timeouts.mail_from_secs, self.client.rset()).await
    }

    async fn shutdown(&mut self) -> Result<Response, ClientError> {
        bounded("QUIT", self.timeouts.quit_secs, self.client.quit()).await
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ehlo_reply(lines: &[&str]) -> Response {
        Response::new(250, lines.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_capabilities_from_ehlo() {
        let capabilities = Capabilities::from_ehlo(&ehlo_reply(&[
            "mail.example.com Hello",
            "PIPELINING",
            "SIZE 10240000",
            "STARTTLS",
            "AUTH PLAIN login",
        ]));

        assert!(capabilities.supports("pipelining"));
        assert!(capabilities.supports("SIZE"));
        assert!(capabilities.supports("STARTTLS"));
        assert!(capabilities.supports_auth("PLAIN"));
        assert!(capabilities.supports_auth("LOGIN"));
        assert!(!capabilities.supports_auth("CRAM-MD5"));
    }

    #[test]
    fn test_greeting_line_is_not_a_capability() {
        let capabilities = Capabilities::from_ehlo(&ehlo_reply(&["STARTTLS"]));
        assert!(!capabilities.supports("STARTTLS"));
    }
}
