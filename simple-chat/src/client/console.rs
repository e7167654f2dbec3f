use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    select,
};
use tracing::debug;

use crate::{
    client::{ChatClient, ClientEvents},
    command::{CommandRouter, Dispatch, Flow},
};

/// The user's console: `#` lines drive the client, anything else is chat.
pub struct ClientConsole {
    client: ChatClient,
    events: ClientEvents,
    router: CommandRouter<ChatClient>,
}

impl ClientConsole {
    pub fn new(client: ChatClient, events: ClientEvents) -> Self {
        Self {
            client,
            events,
            router: ChatClient::commands(),
        }
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut ChatClient {
        &mut self.client
    }

    pub async fn handle_input(&mut self, line: &str) -> Flow {
        match self.router.dispatch(&mut self.client, line).await {
            Dispatch::Handled(flow) => flow,
            Dispatch::Unknown(name) => {
                debug!(command = name, "unknown console command");
                self.client.say("Unknown command.");
                Flow::Continue
            }
            Dispatch::NotCommand => self.client.send_chat(line).await,
        }
    }

    /// Interleaves user input with server events until one of them ends the
    /// client. End of input counts as `#quit`.
    pub async fn run<R>(&mut self, input: R) -> io::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let flow = select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.handle_input(&line).await,
                    None => {
                        self.client.close_connection().await;
                        Flow::Shutdown
                    }
                },
                Some(event) = self.events.recv() => self.client.handle_event(event),
            };

            if flow.is_exit() {
                return Ok(flow);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::console::MemoryDisplay;

    fn offline() -> (ClientConsole, Arc<MemoryDisplay>) {
        let display = Arc::new(MemoryDisplay::new());
        let (client, events) = ChatClient::new("alice", "localhost", 5555, display.clone());
        (ClientConsole::new(client, events), display)
    }

    #[tokio::test]
    async fn unknown_commands_are_reported() {
        let (mut console, display) = offline();
        assert_eq!(console.handle_input("#dance").await, Flow::Continue);
        assert_eq!(display.take(), vec!["Unknown command."]);
    }

    #[tokio::test]
    async fn sethost_applies_while_logged_off() {
        let (mut console, display) = offline();
        console.handle_input("#sethost 10.0.0.7").await;
        assert_eq!(console.client().host(), "10.0.0.7");
        assert_eq!(display.take(), vec!["Host set to: 10.0.0.7"]);
    }

    #[tokio::test]
    async fn quit_stops_reading_input() {
        let (mut console, display) = offline();
        let input: &[u8] = b"#getport\n#quit\n#gethost\n";

        let flow = console.run(input).await.expect("console input");

        assert_eq!(flow, Flow::Shutdown);
        assert_eq!(display.take(), vec!["Current port: 5555"]);
    }

    #[tokio::test]
    async fn end_of_input_quits() {
        let (mut console, _display) = offline();
        let input: &[u8] = b"";
        assert_eq!(console.run(input).await.expect("console input"), Flow::Shutdown);
    }
}
