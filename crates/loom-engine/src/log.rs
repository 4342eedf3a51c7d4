//! Append-only conversation log shared by every task in a graph.

use std::collections::HashSet;

use loom_core::messages::{Message, Role};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn append(
        &mut self,
        content: impl Into<String>,
        role: Role,
        created_by: impl Into<String>,
        created_for: impl Into<String>,
    ) -> &Message {
        self.push(Message::new(content, role, created_by, created_for))
    }

    pub fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Messages addressed to `task`, in append order.
    pub fn slice_for_task(&self, task: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.created_for == task)
            .collect()
    }

    pub fn slice_for_tasks(&self, tasks: &HashSet<String>) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| tasks.contains(&m.created_for))
            .collect()
    }

    pub fn last_for_task(&self, task: &str) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.created_for == task)
    }

    pub fn has_messages_for(&self, task: &str) -> bool {
        self.messages.iter().any(|m| m.created_for == task)
    }

    pub fn export(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
