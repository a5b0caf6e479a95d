//! Value stack of the builder
//!
//! Expression evaluation pushes the definitions it produces; consumers pop
//! them in LIFO order. The stack exists only while one function is built.

use crate::il::InstrId;

/// Pending definitions, bottom first
#[derive(Debug, Clone, Default)]
pub struct ValueStack {
    values: Vec<InstrId>,
}

impl ValueStack {
    /// The empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a definition
    pub fn push(&mut self, value: InstrId) {
        self.values.push(value);
    }

    /// Pop the top definition
    pub fn pop(&mut self) -> Option<InstrId> {
        self.values.pop()
    }

    /// Pop `n` definitions, returned in push order
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<InstrId>> {
        if n > self.values.len() {
            return None;
        }
        let at = self.values.len() - n;
        Some(self.values.split_off(at))
    }

    /// Top definition
    pub fn top(&self) -> Option<InstrId> {
        self.values.last().copied()
    }

    /// Definition `depth` slots below the top
    pub fn peek(&self, depth: usize) -> Option<InstrId> {
        self.values.iter().rev().nth(depth).copied()
    }

    /// Definition at absolute index `index` (0 is the bottom)
    pub fn at(&self, index: usize) -> Option<InstrId> {
        self.values.get(index).copied()
    }

    /// Number of pending definitions
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop everything above `len`
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }
}
