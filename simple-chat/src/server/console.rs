use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::{
    command::{CommandRouter, Dispatch, Flow},
    server::ServerAdmin,
};

/// The server operator's console: `#` lines are admin commands, anything
/// else is announced to every client.
pub struct ServerConsole {
    admin: ServerAdmin,
    router: CommandRouter<ServerAdmin>,
}

impl ServerConsole {
    pub fn new(admin: ServerAdmin) -> Self {
        Self {
            admin,
            router: ServerAdmin::commands(),
        }
    }

    pub fn admin(&self) -> &ServerAdmin {
        &self.admin
    }

    pub fn admin_mut(&mut self) -> &mut ServerAdmin {
        &mut self.admin
    }

    pub async fn handle_input(&mut self, line: &str) -> Flow {
        match self.router.dispatch(&mut self.admin, line).await {
            Dispatch::Handled(flow) => flow,
            Dispatch::Unknown(name) => {
                debug!(command = name, "unknown console command");
                self.admin.say("Unknown command.");
                Flow::Continue
            }
            Dispatch::NotCommand => {
                self.admin.announce(line);
                Flow::Continue
            }
        }
    }

    /// Feeds console lines in until a command asks to exit. Returns `None`
    /// if the input ends first.
    pub async fn run<R>(&mut self, input: R) -> io::Result<Option<Flow>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let flow = self.handle_input(&line).await;
            if flow.is_exit() {
                return Ok(Some(flow));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::console::MemoryDisplay;

    fn console() -> (ServerConsole, Arc<MemoryDisplay>) {
        let display = Arc::new(MemoryDisplay::new());
        let admin = ServerAdmin::new(0, display.clone());
        (ServerConsole::new(admin), display)
    }

    #[tokio::test]
    async fn unknown_commands_are_reported() {
        let (mut console, display) = console();
        assert_eq!(console.handle_input("#frobnicate").await, Flow::Continue);
        assert_eq!(display.take(), vec!["Unknown command."]);
    }

    #[tokio::test]
    async fn plain_lines_are_announced() {
        let (mut console, display) = console();
        assert_eq!(console.handle_input("hello").await, Flow::Continue);
        assert_eq!(display.take(), vec!["SERVER MSG> hello"]);
    }

    #[tokio::test]
    async fn port_commands_while_stopped() {
        let (mut console, display) = console();

        console.handle_input("#setport 7001").await;
        console.handle_input("#getport").await;
        console.handle_input("#setport seventy").await;
        console.handle_input("#stop").await;

        assert_eq!(
            display.take(),
            vec![
                "Port set to 7001",
                "Current port: 7001",
                "Error: Invalid port number.",
                "Error: Server is not listening.",
            ]
        );
        assert_eq!(console.admin().port(), 7001);
    }

    #[tokio::test]
    async fn start_stop_and_close_report_progress() {
        let (mut console, display) = console();

        console.handle_input("#start").await;
        let port = console.admin().port();
        console.handle_input("#START").await;
        console.handle_input("#stop").await;
        console.handle_input("#close").await;

        assert_eq!(
            display.take(),
            vec![
                format!("Server listening for connections on port {port}"),
                "Server is now listening for clients.".to_string(),
                "Error: Server is already listening.".to_string(),
                "Server has stopped listening for connections.".to_string(),
                "Server has stopped listening for clients.".to_string(),
                "Server has closed all connections.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn quit_ends_the_console_loop() {
        let (mut console, display) = console();
        let input: &[u8] = b"#start\nhello\n#quit\nnever read\n";

        let flow = console.run(input).await.expect("console input");

        assert_eq!(flow, Some(Flow::Shutdown));
        assert!(console.admin().server().is_shut_down());
        assert_eq!(display.last().as_deref(), Some("Server is shutting down."));
        assert!(!display.lines().iter().any(|line| line.contains("never read")));
    }

    #[tokio::test]
    async fn console_returns_none_at_end_of_input() {
        let (mut console, _display) = console();
        let input: &[u8] = b"#getport\n";
        assert_eq!(console.run(input).await.expect("console input"), None);
    }
}
