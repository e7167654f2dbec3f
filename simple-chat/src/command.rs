//! Prefix-command routing shared by the server and client consoles.
//!
//! A console line starting with `#` is a command. The first
//! whitespace-separated token names it (matched case-insensitively, without
//! the `#`) and the trimmed remainder is handed to the handler as its
//! argument string. Each console builds one [`CommandRouter`] over its own
//! target type, so the two vocabularies never mix.

use std::{collections::HashMap, process::ExitCode};

use futures::future::BoxFuture;

pub const COMMAND_PREFIX: char = '#';

/// What the console loop should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Orderly exit, status 0.
    Shutdown,
    /// Exit after a fatal error, status 1.
    Abort,
}

impl Flow {
    pub fn is_exit(self) -> bool {
        !matches!(self, Flow::Continue)
    }
}

impl From<Flow> for ExitCode {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::Continue | Flow::Shutdown => ExitCode::SUCCESS,
            Flow::Abort => ExitCode::FAILURE,
        }
    }
}

/// A command handler: receives the console's target and the argument string.
pub type Handler<T> = for<'a> fn(&'a mut T, &'a str) -> BoxFuture<'a, Flow>;

#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    Handled(Flow),
    /// Line was a command but nothing is registered under this name.
    Unknown(String),
    /// Line does not start with the command prefix.
    NotCommand,
}

pub struct CommandRouter<T> {
    handlers: HashMap<&'static str, Handler<T>>,
}

impl<T> CommandRouter<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` under `name` (lower-case, without the `#`).
    pub fn route(mut self, name: &'static str, handler: Handler<T>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub async fn dispatch(&self, target: &mut T, line: &str) -> Dispatch {
        let Some((name, args)) = split_command(line) else {
            return Dispatch::NotCommand;
        };

        match self.handlers.get(name.as_str()) {
            Some(handler) => Dispatch::Handled(handler(target, args).await),
            None => Dispatch::Unknown(name),
        }
    }
}

impl<T> Default for CommandRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `#name args` into the lower-cased name and the trimmed arguments.
pub fn split_command(line: &str) -> Option<(String, &str)> {
    let body = line.strip_prefix(COMMAND_PREFIX)?.trim_end();
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };
    Some((name.to_ascii_lowercase(), args))
}
