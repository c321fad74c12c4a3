//! Connection settings for the SMTP transport.

use std::{fmt, time::Duration};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Where and how to connect.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Server host name or address
    pub host: String,

    /// Default: 587 (submission)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name used for TLS server name verification. Defaults to `host`.
    #[serde(default)]
    pub server_domain: Option<String>,

    /// Name we announce in EHLO
    ///
    /// Default: "localhost"
    #[serde(default = "default_helo_domain")]
    pub helo_domain: String,

    /// Upgrade every session with STARTTLS before authenticating
    ///
    /// Default: `true`
    #[serde(default = "default_starttls")]
    pub starttls: bool,

    /// Accept invalid TLS certificates (for testing only)
    ///
    /// **SECURITY WARNING**: Setting this to `true` disables certificate
    /// validation, making connections vulnerable to Man-in-the-Middle attacks.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Credentials presented after the (optional) upgrade. Sessions skip
    /// authentication when absent.
    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl SmtpConfig {
    /// A configuration with defaults for everything but the address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            server_domain: None,
            helo_domain: default_helo_domain(),
            starttls: default_starttls(),
            accept_invalid_certs: false,
            credentials: None,
            timeouts: ClientTimeouts::default(),
        }
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn server_domain(&self) -> &str {
        self.server_domain.as_deref().unwrap_or(&self.host)
    }
}

const fn default_port() -> u16 {
    587
}

fn default_helo_domain() -> String {
    "localhost".to_string()
}

const fn default_starttls() -> bool {
    true
}

/// SMTP AUTH credentials.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Seconds allowed for a single command/reply exchange.
const COMMAND_SECS: u64 = 30;

/// Per-step limits, in seconds. Omitted fields keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientTimeouts {
    /// TCP connect plus greeting (30)
    pub connect_secs: u64,
    /// EHLO (30)
    pub ehlo_secs: u64,
    /// STARTTLS including the handshake (30)
    pub starttls_secs: u64,
    /// The whole AUTH exchange (30)
    pub auth_secs: u64,
    /// MAIL FROM, also used for RSET (30)
    pub mail_from_secs: u64,
    /// RCPT TO (30)
    pub rcpt_to_secs: u64,
    /// DATA, and separately the content that follows it (120)
    pub data_secs: u64,
    /// QUIT (10)
    pub quit_secs: u64,
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: COMMAND_SECS,
            ehlo_secs: COMMAND_SECS,
            starttls_secs: COMMAND_SECS,
            auth_secs: COMMAND_SECS,
            mail_from_secs: COMMAND_SECS,
            rcpt_to_secs: COMMAND_SECS,
            data_secs: 4 * COMMAND_SECS,
            quit_secs: 10,
        }
    }
}
