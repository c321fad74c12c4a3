//! SMTP transport for volley.
//!
//! [`transport::Connector`] and [`transport::Transport`] are the seam the
//! dispatcher is written against; [`transport::SmtpConnector`] is the
//! implementation that talks to a real server.

pub mod client;
mod config;
pub mod transport;

pub use config::{ClientTimeouts, Credentials, SmtpConfig};
pub use transport::{Capabilities, Connector, SmtpConnector, SmtpTransport, Transport};
