//! Where console-facing output goes.
//!
//! Command feedback and relayed chat lines are written through
//! [`ChatDisplay`]; diagnostics go through `tracing` instead.

use std::sync::{Mutex, PoisonError};

pub trait ChatDisplay: Send + Sync {
    fn display(&self, message: &str);
}

/// Prints each message on its own stdout line after a fixed prefix.
#[derive(Debug, Clone, Copy)]
pub struct StdoutDisplay {
    prefix: &'static str,
}

impl StdoutDisplay {
    /// Server console style: the message as is.
    pub fn plain() -> Self {
        Self { prefix: "" }
    }

    /// Client console style: every line starts with `> `.
    pub fn prompted() -> Self {
        Self { prefix: "> " }
    }
}

impl ChatDisplay for StdoutDisplay {
    fn display(&self, message: &str) {
        println!("{}{}", self.prefix, message);
    }
}

/// Keeps displayed lines in memory; lets tests assert on console output.
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    lines: Mutex<Vec<String>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns and forgets everything displayed so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn last(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ChatDisplay for MemoryDisplay {
    fn display(&self, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
