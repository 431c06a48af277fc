//! FIFO staging area for messages that have no partition yet

use crate::message::PendingMessage;
use std::collections::VecDeque;

/// Pending messages in submission order, with running byte accounting
#[derive(Debug, Default)]
pub struct PendingMessageQueue {
    messages: VecDeque<PendingMessage>,
    bytesize: usize,
}

impl PendingMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: PendingMessage) {
        self.bytesize += message.bytesize();
        self.messages.push_back(message);
    }

    /// Take the oldest message
    pub fn pop_front(&mut self) -> Option<PendingMessage> {
        let message = self.messages.pop_front()?;
        self.bytesize -= message.bytesize();
        Some(message)
    }

    /// Put a message back at the head, preserving FIFO order for a retry
    pub fn push_front(&mut self, message: PendingMessage) {
        self.bytesize += message.bytesize();
        self.messages.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn bytesize(&self) -> usize {
        self.bytesize
    }

    /// Distinct topics of the queued messages
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.topic.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.bytesize = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProducerRecord;

    fn msg(value: &'static str) -> PendingMessage {
        PendingMessage::from_record(ProducerRecord::new("topic", value))
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PendingMessageQueue::new();
        queue.push(msg("a"));
        queue.push(msg("b"));
        queue.push(msg("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().value, "a");
        assert_eq!(queue.pop_front().unwrap().value, "b");
        assert_eq!(queue.pop_front().unwrap().value, "c");
        assert!(queue.pop_front().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_restores_head() {
        let mut queue = PendingMessageQueue::new();
        queue.push(msg("a"));
        queue.push(msg("b"));

        let head = queue.pop_front().unwrap();
        queue.push_front(head);

        let values: Vec<_> = queue.iter().map(|m| m.value.clone()).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_bytesize_tracking() {
        let mut queue = PendingMessageQueue::new();
        queue.push(msg("abc"));
        queue.push(msg("de"));
        assert_eq!(queue.bytesize(), 5);

        queue.pop_front();
        assert_eq!(queue.bytesize(), 2);

        queue.clear();
        assert_eq!(queue.bytesize(), 0);
        assert!(queue.is_empty());
    }
}
