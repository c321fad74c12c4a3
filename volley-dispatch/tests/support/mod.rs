//! Test support for dispatch scenarios.
//!
//! [`mock_transport`] scripts server behaviour in memory so tests can force
//! rejections, broken connections and failed opens deterministically.
//! [`mock_server`] speaks real SMTP over TCP for end-to-end runs.

#![allow(dead_code)]

pub mod mock_server;
pub mod mock_transport;

use volley_common::Message;

pub use mock_server::{MockSmtpServer, SmtpCommand};
pub use mock_transport::{MockConnector, Script};

/// `count` valid messages addressed to `user{i}@example.com`.
pub fn messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            Message::new(
                format!("user{i}@example.com"),
                format!("Message {i}"),
                "Hello from the test suite",
            )
        })
        .collect()
}
