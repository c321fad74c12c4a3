//! Async SMTP client used by the transport.
//!
//! - Plain TCP connections with STARTTLS upgrade
//! - AUTH PLAIN and AUTH LOGIN
//! - Multi-line reply parsing
//! - MIME message building for the DATA phase
//!
//! # Example
//!
//! ```no_run
//! use volley_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost:2525", "localhost".to_string()).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Test")
//!     .text("Hello World")
//!     .build();
//! assert!(client.send_data(&message).await?.is_success());
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;
pub mod tls;

pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::Response;
pub use smtp_client::SmtpClient;
