pub mod logging;
pub mod message;

pub use message::{Message, ValidationError};
pub use tracing;
