use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn server_and_clients_chat_end_to_end() -> Result<()> {
    let server_bin = assert_cmd::cargo::cargo_bin!("server");
    let client_bin = assert_cmd::cargo::cargo_bin!("client");

    let mut server = spawn_process(server_bin, &["0"], "server")?;
    let banner = server.read_line_expect("waiting for server banner").await?;
    let port = banner
        .strip_prefix("Server listening for connections on port ")
        .ok_or_else(|| anyhow!("unexpected server banner: {banner}"))?
        .to_string();

    let mut alice = spawn_process(client_bin, &["alice", "127.0.0.1", &port], "alice")?;
    assert_eq!(
        alice.read_line_expect("waiting for alice login").await?,
        "> Login successful as alice"
    );
    let mut bob = spawn_process(client_bin, &["bob", "127.0.0.1", &port], "bob")?;
    assert_eq!(
        bob.read_line_expect("waiting for bob login").await?,
        "> Login successful as bob"
    );

    alice.send_line("hello").await?;
    assert_eq!(
        alice.read_line_expect("waiting for alice echo").await?,
        "> alice: hello"
    );
    assert_eq!(
        bob.read_line_expect("waiting for bob to hear alice").await?,
        "> alice: hello"
    );

    server.send_line("closing soon").await?;
    assert_eq!(
        server.read_line_expect("waiting for server echo").await?,
        "SERVER MSG> closing soon"
    );
    assert_eq!(
        bob.read_line_expect("waiting for bob to hear the server").await?,
        "> SERVER MSG> closing soon"
    );

    bob.send_line("#getport").await?;
    assert_eq!(
        bob.read_line_expect("waiting for bob port").await?,
        format!("> Current port: {port}")
    );

    alice.send_line("#quit").await?;
    ensure_success(&mut alice.child, "alice client").await?;

    server.send_line("#quit").await?;
    // Read until the server exits.
    let mut last = None;
    while let Some(line) = server.read_line().await? {
        last = Some(line);
    }
    assert_eq!(last.as_deref(), Some("Server is shutting down."));
    ensure_success(&mut server.child, "server").await?;

    let mut bob_last = None;
    while let Some(line) = bob.read_line().await? {
        bob_last = Some(line);
    }
    assert_eq!(bob_last.as_deref(), Some("> Server has shut down."));
    ensure_success(&mut bob.child, "bob client").await?;

    Ok(())
}

#[tokio::test]
async fn client_without_login_id_aborts() -> Result<()> {
    let client_bin = assert_cmd::cargo::cargo_bin!("client");
    let mut client = spawn_process(client_bin, &[], "client")?;

    assert_eq!(
        client.read_line_expect("waiting for error").await?,
        "ERROR - No login ID specified. Connection aborted."
    );
    let status = client.child.wait().await?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Process {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line_expect(&mut self, description: &str) -> Result<String> {
        match self.read_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(anyhow!("{description}: stream closed")),
            Err(err) => Err(err.context(format!("{description}: failed to read line"))),
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let byte_count = timeout(READ_TIMEOUT, self.stdout.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for line"))??;
        if byte_count == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

fn spawn_process(binary: &Path, args: &[&str], name: &str) -> Result<Process> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {name}"))?;
    let stdin = child
        .stdin
        .take()
        .with_context(|| format!("{name} stdin missing after spawn"))?;
    let stdout = child
        .stdout
        .take()
        .with_context(|| format!("{name} stdout missing after spawn"))?;

    Ok(Process {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .map_err(|_| anyhow!("timed out waiting for {name} to exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
