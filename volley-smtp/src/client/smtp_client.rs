//! A single SMTP connection: command/reply exchange, STARTTLS and AUTH.

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use volley_common::{incoming, outgoing};

use super::{
    error::{ClientError, Result},
    response::Response,
    tls,
};

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 4096;

/// Upper bound on a single buffered reply.
const MAX_REPLY_BYTES: usize = 1024 * 1024;

enum Stream {
    Plain(TcpStream),
    Secure(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Plain(tcp) => tcp.write_all(bytes).await?,
            Self::Secure(tls) => tls.write_all(bytes).await?,
        }
        Ok(())
    }

    /// Reads whatever is available; a zero-byte read means the peer hung up.
    async fn read_some(&mut self, chunk: &mut [u8]) -> Result<usize> {
        let read = match self {
            Self::Plain(tcp) => tcp.read(chunk).await?,
            Self::Secure(tls) => tls.read(chunk).await?,
        };
        match read {
            0 => Err(ClientError::ConnectionClosed),
            n => Ok(n),
        }
    }
}

/// A single connection to an SMTP server.
///
/// Methods send one command and return the server's reply; interpreting the
/// reply code is left to the caller.
pub struct SmtpClient {
    stream: Option<Stream>,
    pending: Vec<u8>,
    server_domain: String,
    tls: Option<TlsConnector>,
}

impl SmtpClient {
    /// Opens a TCP connection to `addr`. The greeting is not read.
    ///
    /// # Errors
    ///
    /// Any I/O error from establishing the socket.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;

        Ok(Self {
            stream: Some(Stream::Plain(tcp)),
            pending: Vec::with_capacity(READ_CHUNK),
            server_domain,
            tls: None,
        })
    }

    /// Supplies the TLS connector used by [`Self::starttls`].
    #[must_use]
    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// `true` once STARTTLS has completed.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.stream, Some(Stream::Secure(_)))
    }

    /// # Errors
    ///
    /// Fails if the connection drops or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends `line` followed by CRLF and waits for the reply.
    ///
    /// # Errors
    ///
    /// I/O failures and unparseable replies.
    pub async fn command(&mut self, line: &str) -> Result<Response> {
        outgoing!("{}", line);
        self.send_line(line).await
    }

    /// As [`Self::command`], but the line is not logged.
    async fn secret_command(&mut self, line: &str) -> Result<Response> {
        outgoing!("<redacted>");
        self.send_line(line).await
    }

    async fn send_line(&mut self, line: &str) -> Result<Response> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");

        self.stream()?.write_all(&bytes).await?;
        self.read_response().await
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        self.stream.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends message content after a `354`, followed by the terminating dot.
    ///
    /// Line endings are normalised to CRLF and lines starting with `.` are
    /// dot-stuffed.
    ///
    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let payload = dot_stuff(data);
        outgoing!("<{} bytes of message data>", payload.len());
        self.stream()?.write_all(&payload).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Sends STARTTLS and, on a 2xx reply, performs the TLS handshake.
    ///
    /// # Errors
    ///
    /// Fails without sending anything if no TLS connector was supplied, and
    /// on any I/O or handshake failure.
    pub async fn starttls(&mut self) -> Result<Response> {
        let Some(connector) = self.tls.clone() else {
            return Err(ClientError::TlsError(
                "no TLS configuration for this connection".to_string(),
            ));
        };

        let reply = self.command("STARTTLS").await?;
        if !reply.is_success() {
            return Ok(reply);
        }

        let tcp = match self.stream.take() {
            Some(Stream::Plain(tcp)) => tcp,
            Some(secure @ Stream::Secure(_)) => {
                self.stream = Some(secure);
                return Err(ClientError::TlsError("TLS is already active".to_string()));
            }
            None => return Err(ClientError::ConnectionClosed),
        };

        // Bytes received before the handshake must not be trusted afterwards.
        self.pending.clear();

        let secured = connector
            .connect(tls::server_name(&self.server_domain)?, tcp)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;
        self.stream = Some(Stream::Secure(Box::new(secured)));

        Ok(reply)
    }

    /// AUTH PLAIN with an initial response (RFC 4616).
    ///
    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.secret_command(&format!("AUTH PLAIN {token}")).await
    }

    /// AUTH LOGIN, answering the username and password challenges.
    ///
    /// Stops at the first reply that is not a `334` challenge.
    ///
    /// # Errors
    ///
    /// See [`Self::command`].
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let reply = self.command("AUTH LOGIN").await?;
        if reply.code != 334 {
            return Ok(reply);
        }

        let reply = self.secret_command(&STANDARD.encode(username)).await?;
        if reply.code != 334 {
            return Ok(reply);
        }

        self.secret_command(&STANDARD.encode(password)).await
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some((reply, consumed)) = Response::parse_response(&self.pending)? {
                self.pending.drain(..consumed);
                incoming!("{}", reply);
                return Ok(reply);
            }

            if self.pending.len() >= MAX_REPLY_BYTES {
                return Err(ClientError::ParseError(format!(
                    "Reply exceeds {MAX_REPLY_BYTES} bytes"
                )));
            }

            let read = self.stream()?.read_some(&mut chunk).await?;
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Encodes message content for the DATA phase, including the final `.`.
fn dot_stuff(data: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);

    let body = data.strip_suffix('\n').unwrap_or(data);
    let body = body.strip_suffix('\r').unwrap_or(body);

    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push(b'.');
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b".\r\n");
    out
}
