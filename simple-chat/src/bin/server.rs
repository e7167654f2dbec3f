use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::BufReader, runtime::Runtime, select, signal};
use tracing::{info, warn};

use simple_chat::{
    cli::ServerArgs,
    command::Flow,
    config::DEFAULT_SERVER_PORT,
    console::StdoutDisplay,
    logging::init_tracing,
    server::{ServerAdmin, ServerConsole},
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
    let args = ServerArgs::parse();
    let port = args.port().unwrap_or_else(|err| {
        warn!(%err, "falling back to the default port");
        println!("Invalid port number. Using default port {DEFAULT_SERVER_PORT}");
        DEFAULT_SERVER_PORT
    });

    let mut admin = ServerAdmin::new(port, Arc::new(StdoutDisplay::plain()));
    if let Err(err) = admin.start().await {
        warn!(port, error = ?err, "could not start server");
        println!("Error: Could not listen for clients on port {port}");
        return Ok(ExitCode::FAILURE);
    }

    let mut console = ServerConsole::new(admin);
    let stdin = BufReader::new(tokio::io::stdin());
    let flow = select! {
        result = console.run(stdin) => result.context("failed to read server console")?,
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("received ctrl-c");
            Some(Flow::Shutdown)
        }
    };

    let flow = match flow {
        Some(flow) => flow,
        None => {
            info!("console input closed, serving until ctrl-c");
            signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            Flow::Shutdown
        }
    };

    // No-op when `#quit` already ran.
    console.admin_mut().shutdown().await;
    Ok(flow.into())
}
