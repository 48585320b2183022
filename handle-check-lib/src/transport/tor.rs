//! Tor as an anonymizing session.
//!
//! Probes reach Tor through its SOCKS port. Identity rotation goes through the
//! control port: `AUTHENTICATE`, then `SIGNAL NEWNYM`, which makes Tor use fresh
//! circuits for new connections.

use super::AnonymizingSession;
use crate::error::TransportError;
use crate::types::TorSettings;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Session on a local Tor daemon.
#[derive(Debug, Clone)]
pub struct TorSession {
    settings: TorSettings,
}

impl TorSession {
    pub fn new(settings: TorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TorSettings {
        &self.settings
    }

    async fn control_exchange(&self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.settings.control_addr)
            .await
            .map_err(|e| {
                TransportError::proxy(format!(
                    "cannot reach Tor control port {}: {}",
                    self.settings.control_addr, e
                ))
            })?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let auth = match &self.settings.control_password {
            Some(password) => format!("AUTHENTICATE {}\r\n", quote(password)),
            None => "AUTHENTICATE\r\n".to_string(),
        };

        command(&mut reader, &mut writer, &auth).await?;
        command(&mut reader, &mut writer, "SIGNAL NEWNYM\r\n").await?;
        // Tor closes the connection itself after QUIT.
        let _ = writer.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

#[async_trait]
impl AnonymizingSession for TorSession {
    async fn new_session(&self) -> Result<String, TransportError> {
        reqwest::Proxy::all(self.settings.socks_url.as_str()).map_err(|e| {
            TransportError::proxy(format!(
                "invalid Tor SOCKS address '{}': {}",
                self.settings.socks_url, e
            ))
        })?;
        tracing::debug!(socks = %self.settings.socks_url, "Tor session ready");
        Ok(self.settings.socks_url.clone())
    }

    async fn rotate_identity(&self) -> Result<(), TransportError> {
        tokio::time::timeout(CONTROL_TIMEOUT, self.control_exchange())
            .await
            .map_err(|_| TransportError::timeout("Tor control port did not answer"))??;
        tracing::debug!("Tor identity rotated");
        Ok(())
    }
}

/// Send one control command and require a `250` reply.
async fn command<R, W>(reader: &mut R, writer: &mut W, line: &str) -> Result<(), TransportError>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let io_err = |e: std::io::Error| TransportError::proxy(format!("Tor control port: {}", e));

    writer.write_all(line.as_bytes()).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;

    let mut reply = String::new();
    reader.read_line(&mut reply).await.map_err(io_err)?;
    let reply = reply.trim_end();

    if reply.starts_with("250") {
        Ok(())
    } else {
        let verb = line.split_whitespace().next().unwrap_or_default();
        Err(TransportError::proxy(format!(
            "Tor rejected {}: {}",
            verb,
            if reply.is_empty() { "connection closed" } else { reply }
        )))
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
