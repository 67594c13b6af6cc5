use crate::display::{Banner, Display};
use crate::playlist::MediaKind;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

pub fn spawn_mpv(socket_path: &str) -> Result<Child> {
    if Path::new(socket_path).exists() {
        // Stale socket from a previous run
        let _ = std::fs::remove_file(socket_path);
    }

    let child = Command::new("mpv")
        .arg("--idle")
        .arg("--force-window=yes")
        .arg("--fullscreen")
        .arg("--no-osc")
        .arg("--image-display-duration=inf")
        .arg(format!("--input-ipc-server={}", socket_path))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // Wait for socket to be created
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if Path::new(socket_path).exists() {
            return Ok(child);
        }
        thread::sleep(Duration::from_millis(100));
    }

    tracing::warn!("mpv did not create {} within 10s", socket_path);
    Ok(child)
}

#[derive(Debug, Clone)]
pub struct MpvClient {
    socket_path: String,
}

impl MpvClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    pub fn play(&self, path: &str) -> Result<()> {
        self.send_command(json!({
            "command": ["loadfile", path, "replace"]
        }))?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(json!({
            "command": ["stop"]
        }))?;
        Ok(())
    }

    pub fn show_text(&self, text: &str, duration_ms: u64) -> Result<()> {
        self.send_command(json!({
            "command": ["show-text", text, duration_ms]
        }))?;
        Ok(())
    }

    pub fn is_idle(&self) -> Result<bool> {
        let response = self.send_command(json!({
            "command": ["get_property", "idle-active"]
        }))?;

        response["data"]
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("Invalid response"))
    }

    pub fn eof_reached(&self) -> Result<bool> {
        let response = self.send_command(json!({
            "command": ["get_property", "eof-reached"]
        }))?;

        Ok(response["data"].as_bool().unwrap_or(false))
    }

    pub fn send_command(&self, cmd: Value) -> Result<Value> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_write_timeout(Some(Duration::from_secs(1)))?;
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;

        let cmd_str = format!("{}\n", serde_json::to_string(&cmd)?);
        tracing::debug!(target: "slotcast_player::mpv_client", "Sending command: {}", cmd_str.trim());

        stream.write_all(cmd_str.as_bytes())?;

        let mut reader = BufReader::new(stream);
        loop {
            let mut response = String::new();
            if reader.read_line(&mut response)? == 0 {
                return Err(anyhow::anyhow!("mpv closed the socket"));
            }

            let value: Value = serde_json::from_str(&response)?;
            // Event lines can precede the reply.
            if value.get("event").is_some() {
                continue;
            }
            return match value["error"].as_str() {
                Some("success") | None => Ok(value),
                Some(err) => Err(anyhow::anyhow!("mpv: {}", err)),
            };
        }
    }
}

/// Drives mpv over its IPC socket; blocking calls run off the runtime.
pub struct MpvDisplay {
    client: MpvClient,
}

impl MpvDisplay {
    pub fn new(client: MpvClient) -> Self {
        Self { client }
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MpvClient) -> Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client)).await?
    }
}

#[async_trait]
impl Display for MpvDisplay {
    async fn show(&self, location: &str, kind: MediaKind) -> Result<()> {
        tracing::debug!("Showing {:?} {}", kind, location);
        let location = location.to_string();
        self.call(move |mpv| mpv.play(&location)).await
    }

    async fn finished(&self) -> Result<bool> {
        self.call(|mpv| Ok(mpv.is_idle()? || mpv.eof_reached()?))
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.call(|mpv| mpv.stop()).await
    }

    async fn banner(&self, banner: &Banner) -> Result<()> {
        let text = banner.text();
        // One day; the next banner or item replaces it.
        self.call(move |mpv| mpv.show_text(&text, 24 * 60 * 60 * 1000))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    fn fake_mpv(replies: &'static str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&path).unwrap();

        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut line = String::new();
                BufReader::new(stream.try_clone().unwrap())
                    .read_line(&mut line)
                    .unwrap();
                stream.write_all(replies.as_bytes()).unwrap();
            }
        });

        (dir, path.to_string_lossy().to_string())
    }

    #[test]
    fn test_events_before_reply_are_skipped() {
        let (_dir, path) = fake_mpv(
            "{\"event\":\"start-file\"}\n{\"data\":true,\"error\":\"success\"}\n",
        );
        assert!(MpvClient::new(path).is_idle().unwrap());
    }

    #[test]
    fn test_mpv_error_is_reported() {
        let (_dir, path) = fake_mpv("{\"error\":\"property unavailable\"}\n");
        let err = MpvClient::new(path).is_idle().unwrap_err();
        assert!(err.to_string().contains("property unavailable"));
    }
}
