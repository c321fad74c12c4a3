//! One authenticated connection, reused for many messages.
//!
//! ```text
//! Disconnected -> Connected -> Identified -> [SecureIdentified] -> [Authenticated] -> Ready
//! Ready -> Sending -> Ready
//! any state -> Closed
//! ```
//!
//! A session that fails to open is not reopened: the caller closes it and
//! starts a new one.

use std::{sync::Arc, time::Duration};

use volley_common::internal;
use volley_smtp::{
    Connector, Credentials, SmtpConfig, Transport,
    client::{ClientError, Response},
};

use crate::{
    batch::WireMessage,
    error::{SendError, SessionError},
    timing::{Command, Phase, TimingAggregator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Identified,
    SecureIdentified,
    Authenticated,
    Ready,
    Sending,
    Closed,
}

/// What every session must do while opening.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Upgrade with STARTTLS after the first EHLO
    pub starttls: bool,

    /// Authenticate once identified (and upgraded, when `starttls` is set)
    pub credentials: Option<Credentials>,
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            starttls: config.starttls,
            credentials: config.credentials.clone(),
        }
    }
}

enum Step<'a> {
    Identify,
    Upgrade,
    Authenticate(&'a Credentials),
    Sender(&'a str),
    Recipient(&'a str),
    Content(&'a str),
    Reset,
    Shutdown,
}

pub struct Session<C: Connector> {
    connector: Arc<C>,
    options: Arc<SessionOptions>,
    timings: Arc<TimingAggregator>,
    transport: Option<C::Transport>,
    state: SessionState,
    usable: bool,
    sent: usize,
}

impl<C: Connector> Session<C> {
    #[must_use]
    pub const fn new(
        connector: Arc<C>,
        options: Arc<SessionOptions>,
        timings: Arc<TimingAggregator>,
    ) -> Self {
        Self {
            connector,
            options,
            timings,
            transport: None,
            state: SessionState::Disconnected,
            usable: true,
            sent: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Messages confirmed sent on this session.
    #[must_use]
    pub const fn sent(&self) -> usize {
        self.sent
    }

    /// `false` once the connection has failed underneath the session, after
    /// which no further commands are issued on it.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.usable
    }

    /// Connects, identifies, optionally upgrades and authenticates. Each
    /// step is timed under its own [`Phase`].
    ///
    /// # Errors
    ///
    /// Returns the first step that failed or was rejected. The session must
    /// then be closed and discarded.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "open",
            });
        }

        let result = self.handshake().await;
        if let Err(error) = &result {
            tracing::warn!(%error, "Failed to open session");
        }
        result
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let limit: Duration = self.connector.connect_timeout();
        let connected = self
            .timings
            .timed(
                Phase::Connect,
                tokio::time::timeout(limit, self.connector.connect()),
            )
            .await;

        let (transport, greeting) = match connected {
            Err(_) => {
                self.usable = false;
                return Err(SessionError::Timeout {
                    phase: Phase::Connect,
                    after: limit,
                });
            }
            Ok(Err(error)) => {
                self.usable = false;
                return Err(SessionError::Connect(error.to_string()));
            }
            Ok(Ok(connected)) => connected,
        };

        self.transport = Some(transport);
        self.state = SessionState::Connected;
        if !greeting.is_success() {
            return Err(SessionError::rejected(Phase::Connect, &greeting));
        }

        self.open_step(Phase::Identify, Step::Identify).await?;
        self.state = SessionState::Identified;

        if self.supports("PIPELINING") {
            internal!(level = DEBUG, "Server supports PIPELINING");
        }

        let options = Arc::clone(&self.options);

        if options.starttls {
            self.open_step(Phase::SecureUpgrade, Step::Upgrade).await?;
            self.open_step(Phase::PostUpgradeIdentify, Step::Identify)
                .await?;
            self.state = SessionState::SecureIdentified;
        }

        if let Some(credentials) = &options.credentials {
            let response = self
                .open_step(Phase::Authenticate, Step::Authenticate(credentials))
                .await?;
            if response.code != 235 {
                return Err(SessionError::rejected(Phase::Authenticate, &response));
            }
            self.state = SessionState::Authenticated;
        }

        self.state = SessionState::Ready;
        internal!(level = DEBUG, "Session ready");
        Ok(())
    }

    async fn open_step(&mut self, phase: Phase, step: Step<'_>) -> Result<Response, SessionError> {
        let response = self
            .exchange(phase, step)
            .await
            .map_err(|error| SessionError::transport(phase, &error))?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(SessionError::rejected(phase, &response))
        }
    }

    fn supports(&self, keyword: &str) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.capabilities().supports(keyword))
    }

    /// Submits one message. Only a final success reply to the content counts
    /// as sent.
    ///
    /// A rejected command is followed by a reset so the session can carry on
    /// with the next message; if the reset fails the session becomes
    /// unusable.
    ///
    /// # Errors
    ///
    /// Returns the step that was rejected or failed.
    #[tracing::instrument(level = "debug", skip_all, fields(recipient = %message.recipient))]
    pub async fn send(&mut self, message: &WireMessage) -> Result<(), SendError> {
        if self.state != SessionState::Ready || !self.usable {
            return Err(SendError::NotReady(self.state));
        }

        self.state = SessionState::Sending;
        let result = self.transaction(message).await;

        match &result {
            Ok(()) => self.sent += 1,
            Err(SendError::Rejected { .. }) if self.usable => self.reset().await,
            Err(_) => {}
        }

        self.state = SessionState::Ready;
        result
    }

    async fn transaction(&mut self, message: &WireMessage) -> Result<(), SendError> {
        self.send_step(Command::SubmitSender, Step::Sender(&message.sender))
            .await?;
        self.send_step(
            Command::SubmitRecipient,
            Step::Recipient(&message.recipient),
        )
        .await?;
        self.send_step(Command::SubmitData, Step::Content(&message.content))
            .await
    }

    async fn send_step(&mut self, command: Command, step: Step<'_>) -> Result<(), SendError> {
        let response = self
            .exchange(Phase::Command(command), step)
            .await
            .map_err(|error| SendError::transport(command, &error))?;

        if response.is_success() {
            Ok(())
        } else {
            Err(SendError::rejected(command, &response))
        }
    }

    async fn reset(&mut self) {
        match self.exchange(Phase::Command(Command::Reset), Step::Reset).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                tracing::warn!(%response, "Reset rejected, abandoning session");
                self.usable = false;
            }
            Err(error) => {
                tracing::warn!(%error, "Reset failed, abandoning session");
                self.usable = false;
            }
        }
    }

    /// Ends the session. Sends QUIT when the connection is still usable and
    /// ignores any problem doing so. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.usable && self.transport.is_some() {
            match self
                .exchange(Phase::Command(Command::FinalizeSession), Step::Shutdown)
                .await
            {
                Ok(response) if response.is_success() => {}
                Ok(response) => {
                    internal!(level = DEBUG, "Unexpected reply to QUIT: {}", response);
                }
                Err(error) => internal!(level = DEBUG, "QUIT failed: {}", error),
            }
        }

        self.transport = None;
        self.usable = false;
        self.state = SessionState::Closed;
    }

    /// Runs one step on the transport, timing it under `phase`. Any failure
    /// of the connection itself, or a `421`, makes the session unusable.
    async fn exchange(&mut self, phase: Phase, step: Step<'_>) -> Result<Response, ClientError> {
        let Some(transport) = self.transport.as_mut() else {
            self.usable = false;
            return Err(ClientError::ConnectionClosed);
        };

        let result = self
            .timings
            .timed(phase, async {
                match step {
                    Step::Identify => transport.identify().await,
                    Step::Upgrade => transport.upgrade_secure().await,
                    Step::Authenticate(credentials) => transport.authenticate(credentials).await,
                    Step::Sender(address) => transport.declare_sender(address).await,
                    Step::Recipient(address) => transport.declare_recipient(address).await,
                    Step::Content(content) => transport.transmit_content(content).await,
                    Step::Reset => transport.reset().await,
                    Step::Shutdown => transport.shutdown().await,
                }
            })
            .await;

        match &result {
            Ok(response) if response.is_service_closing() => self.usable = false,
            Err(error) if error.breaks_connection() => self.usable = false,
            _ => {}
        }

        result
    }
}
