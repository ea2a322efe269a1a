use std::{fs, path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_client_replays_script_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("tuple-space");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;
    let port = addr
        .rsplit(':')
        .next()
        .context("server address missing port")?
        .to_string();

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let dir = tempfile::tempdir()?;
    let script = dir.path().join("requests.txt");
    fs::write(
        &script,
        "READ a\nPUT a 1\nPUT a 2\nBOGUS line\nREAD a\nGET a\nREAD a\n",
    )?;

    let output = Command::new(&binary)
        .arg("client")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(&port)
        .arg(&script)
        .env("RUST_LOG", "error")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .context("failed to run client")?;

    assert!(output.status.success(), "client exited with {}", output.status);
    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "READ a: ERR a does not exist",
            "PUT a 1: OK (a, 1) added",
            "PUT a 2: ERR a already exists",
            "READ a: OK (a, 1) read",
            "GET a: OK (a, 1) removed",
            "READ a: ERR a does not exist",
        ]
    );

    // The server runs until interrupted; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

#[test]
fn demo_runs_clients_and_reports_final_statistics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("client_1.txt"), "PUT one 1\nREAD one\n")?;
    fs::write(dir.path().join("client_2.txt"), "PUT two 22\nGET two\nGET two\n")?;

    let assert = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("tuple-space"))
        .arg("demo")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--clients")
        .arg("2")
        .arg("--dir")
        .arg(dir.path())
        .arg("--stats-format")
        .arg("json")
        .env("RUST_LOG", "error")
        .timeout(Duration::from_secs(10))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("PUT one 1: OK (one, 1) added"));
    assert!(stdout.contains("READ one: OK (one, 1) read"));
    assert!(stdout.contains("GET two: OK (two, 22) removed"));
    assert!(stdout.contains("GET two: ERR two does not exist"));

    let lines: Vec<&str> = stdout.lines().collect();
    let first = lines
        .iter()
        .position(|line| line.starts_with("PUT two 22:"))
        .context("second client's output missing")?;
    assert_eq!(
        &lines[first..first + 3],
        [
            "PUT two 22: OK (two, 22) added",
            "GET two: OK (two, 22) removed",
            "GET two: ERR two does not exist",
        ],
        "a client's lines are printed together"
    );

    let summary = stdout
        .lines()
        .last()
        .context("demo printed nothing")?;
    let stats: serde_json::Value = serde_json::from_str(summary)?;
    assert_eq!(stats["clients"], 2);
    assert_eq!(stats["operations"], 5);
    assert_eq!(stats["puts"], 2);
    assert_eq!(stats["errors"], 1);
    assert_eq!(stats["tuples"], 1);

    Ok(())
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
