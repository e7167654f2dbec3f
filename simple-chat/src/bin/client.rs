use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::BufReader, runtime::Runtime, select, signal};
use tracing::{info, warn};

use simple_chat::{
    cli::ClientArgs,
    client::{ChatClient, ClientConsole},
    command::Flow,
    config::DEFAULT_CLIENT_PORT,
    console::StdoutDisplay,
    logging::init_tracing,
};

fn main() -> Result<ExitCode> {
    init_tracing();

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(run());
    // A pending stdin read holds a blocking thread that never finishes.
    runtime.shutdown_background();
    result
}

async fn run() -> Result<ExitCode> {
    let args = ClientArgs::parse();
    let login_id = match args.login_id() {
        Ok(login_id) => login_id.to_string(),
        Err(err) => {
            println!("ERROR - {err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let port = args.port().unwrap_or_else(|err| {
        warn!(%err, "falling back to the default port");
        println!("ERROR - Invalid port number. Using default port: {DEFAULT_CLIENT_PORT}");
        DEFAULT_CLIENT_PORT
    });

    let display = Arc::new(StdoutDisplay::prompted());
    let (client, events) = match ChatClient::connect(login_id, args.host, port, display).await {
        Ok(connected) => connected,
        Err(err) => {
            warn!(error = ?err, "could not connect");
            println!("Error: Can't setup connection! Terminating client.");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut console = ClientConsole::new(client, events);
    let stdin = BufReader::new(tokio::io::stdin());
    let flow = select! {
        result = console.run(stdin) => result.context("failed to read client console")?,
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("received ctrl-c");
            Flow::Shutdown
        }
    };

    console.client_mut().close_connection().await;
    Ok(flow.into())
}
