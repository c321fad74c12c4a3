use std::num::NonZeroUsize;

use volley_common::Message;
use volley_smtp::client::MessageBuilder;

/// A contiguous slice of the input, handled by one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    index: usize,
    offset: usize,
    messages: Vec<Message>,
}

impl Batch {
    /// Splits `messages` into `ceil(len / size)` batches, preserving order.
    /// Every batch but the last holds exactly `size` messages.
    #[must_use]
    pub fn partition(messages: Vec<Message>, size: NonZeroUsize) -> Vec<Self> {
        let size = size.get();
        let mut batches = Vec::with_capacity(messages.len().div_ceil(size));
        let mut messages = messages.into_iter().peekable();

        while messages.peek().is_some() {
            let index = batches.len();
            batches.push(Self {
                index,
                offset: index * size,
                messages: messages.by_ref().take(size).collect(),
            });
        }

        batches
    }

    /// Position of this batch in the run.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages paired with their position in the original input.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.messages
            .iter()
            .enumerate()
            .map(move |(i, message)| (self.offset + i, message))
    }
}

/// A message ready for the wire: envelope plus rendered content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub sender: String,
    pub recipient: String,
    pub content: String,
}

impl WireMessage {
    #[must_use]
    pub fn build(sender: &str, message: &Message) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: message.to().to_string(),
            content: MessageBuilder::outbound(sender, message).build(),
        }
    }
}
