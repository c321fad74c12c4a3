//! In-memory [`Connector`] driven by a [`Script`].
//!
//! Every connection shares one set of counters, so a test can inspect how
//! many sessions were opened, how many were live at once, and which
//! recipients actually received content.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use volley_smtp::{
    Capabilities, Connector, Credentials, Transport,
    client::{ClientError, Response},
};

/// How the scripted server behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub greeting_code: u16,
    /// 1-based connection attempts that are refused
    pub fail_opens: HashSet<usize>,
    /// Refuse this attempt and every one after it
    pub fail_opens_from: Option<usize>,
    pub connect_delay: Duration,
    pub connect_timeout: Duration,
    pub starttls: bool,
    pub auth_code: u16,
    /// RCPT TO reply code per recipient
    pub rejected: HashMap<String, u16>,
    /// Recipients whose content transmission drops the connection
    pub broken: HashSet<String>,
    /// Recipients whose content transmission panics
    pub panics: HashSet<String>,
    pub reset_fails: bool,
    pub send_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting_code: 220,
            fail_opens: HashSet::new(),
            fail_opens_from: None,
            connect_delay: Duration::ZERO,
            connect_timeout: Duration::from_secs(5),
            starttls: true,
            auth_code: 235,
            rejected: HashMap::new(),
            broken: HashSet::new(),
            panics: HashSet::new(),
            reset_fails: false,
            send_delay: Duration::ZERO,
        }
    }
}

impl Script {
    fn refuses(&self, attempt: usize) -> bool {
        self.fail_opens.contains(&attempt) || self.fail_opens_from.is_some_and(|n| attempt >= n)
    }
}

#[derive(Debug, Default)]
struct Shared {
    opens: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    quits: AtomicUsize,
    resets: AtomicUsize,
    authentications: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    script: Arc<Script>,
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            shared: Arc::default(),
        }
    }

    /// Connection attempts, successful or not.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Connections currently alive.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Most connections alive at the same time.
    pub fn max_active(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.shared.quits.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.shared.resets.load(Ordering::SeqCst)
    }

    pub fn authentications(&self) -> usize {
        self.shared.authentications.load(Ordering::SeqCst)
    }

    /// Recipients whose content was accepted, in acceptance order.
    pub fn delivered(&self) -> Vec<String> {
        self.shared.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<(MockTransport, Response), ClientError> {
        let attempt = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.script.connect_delay.is_zero() {
            tokio::time::sleep(self.script.connect_delay).await;
        }

        if self.script.refuses(attempt) {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);

        Ok((
            MockTransport {
                script: Arc::clone(&self.script),
                shared: Arc::clone(&self.shared),
                capabilities: Capabilities::default(),
                recipient: None,
            },
            Response::single(self.script.greeting_code, "mock.example.com ESMTP"),
        ))
    }

    fn connect_timeout(&self) -> Duration {
        self.script.connect_timeout
    }
}

pub struct MockTransport {
    script: Arc<Script>,
    shared: Arc<Shared>,
    capabilities: Capabilities,
    recipient: Option<String>,
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn ok() -> Result<Response, ClientError> {
    Ok(Response::single(250, "OK"))
}

#[async_trait]
impl Transport for MockTransport {
    async fn identify(&mut self) -> Result<Response, ClientError> {
        let mut lines = vec!["mock.example.com".to_string(), "PIPELINING".to_string()];
        if self.script.starttls {
            lines.push("STARTTLS".to_string());
        }
        lines.push("AUTH PLAIN LOGIN".to_string());

        let response = Response::new(250, lines);
        self.capabilities = Capabilities::from_ehlo(&response);
        Ok(response)
    }

    async fn upgrade_secure(&mut self) -> Result<Response, ClientError> {
        if !self.capabilities.supports("STARTTLS") {
            return Err(ClientError::Unsupported("STARTTLS"));
        }
        Ok(Response::single(220, "Ready to start TLS"))
    }

    async fn authenticate(&mut self, _credentials: &Credentials) -> Result<Response, ClientError> {
        self.shared.authentications.fetch_add(1, Ordering::SeqCst);
        Ok(Response::single(self.script.auth_code, "Authentication result"))
    }

    async fn declare_sender(&mut self, _address: &str) -> Result<Response, ClientError> {
        ok()
    }

    async fn declare_recipient(&mut self, address: &str) -> Result<Response, ClientError> {
        self.recipient = Some(address.to_string());
        match self.script.rejected.get(address) {
            Some(code) => Ok(Response::single(*code, "Recipient rejected")),
            None => ok(),
        }
    }

    async fn transmit_content(&mut self, _content: &str) -> Result<Response, ClientError> {
        if !self.script.send_delay.is_zero() {
            tokio::time::sleep(self.script.send_delay).await;
        }

        let recipient = self.recipient.take().unwrap_or_default();
        assert!(
            !self.script.panics.contains(&recipient),
            "scripted panic for {recipient}"
        );
        if self.script.broken.contains(&recipient) {
            return Err(ClientError::ConnectionClosed);
        }

        self.shared.delivered.lock().unwrap().push(recipient);
        Ok(Response::single(250, "Queued"))
    }

    async fn reset(&mut self) -> Result<Response, ClientError> {
        self.shared.resets.fetch_add(1, Ordering::SeqCst);
        self.recipient = None;
        if self.script.reset_fails {
            return Err(ClientError::ConnectionClosed);
        }
        ok()
    }

    async fn shutdown(&mut self) -> Result<Response, ClientError> {
        self.shared.quits.fetch_add(1, Ordering::SeqCst);
        Ok(Response::single(221, "Bye"))
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}
