//! Networked spectrometer driver
//!
//! Protocol Overview:
//! - Transport: plain TCP, ASCII encoded
//! - Framing: every message ends with `>`
//! - Commands: `c0>` open the detector, `#exp=<ms>>` set exposure, `s>` single shot,
//!   `d>` release the detector
//! - Data frame: `<s0 i0 s1 i1 ...>` with interleaved Raman shift / intensity values
//!
//! Frames that do not start with `<` (acknowledgements, status text) are skipped
//! while waiting for a shot.
//!
//! # Example Usage
//!
//! ```no_run
//! use raman_scan::hardware::{Spectrometer, TcpSpectrometer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut spectrometer = TcpSpectrometer::new("127.0.0.1:50009", 10);
//!     spectrometer.connect().await?;
//!     let spectrum = spectrometer.acquire_spectrum().await?;
//!     println!("{} samples", spectrum.len());
//!     spectrometer.disconnect().await?;
//!     Ok(())
//! }
//! ```

use crate::config::TcpSpectrometerConfig;
use crate::hardware::capabilities::{Spectrometer, Spectrum};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

const FRAME_END: u8 = b'>';

/// Driver for a spectrometer served over TCP
pub struct TcpSpectrometer {
    address: String,
    exposure_ms: u32,
    read_timeout: Duration,
    /// Pause after each setup command, giving the server time to apply it
    command_delay: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpSpectrometer {
    /// Create a disconnected driver for `address` (host:port).
    pub fn new(address: impl Into<String>, exposure_ms: u32) -> Self {
        Self {
            address: address.into(),
            exposure_ms,
            read_timeout: Duration::from_secs(5),
            command_delay: Duration::from_millis(100),
            stream: None,
        }
    }

    /// Create a driver from the `[tcp_spectrometer]` settings.
    pub fn from_config(config: &TcpSpectrometerConfig) -> Self {
        Self::new(config.address.clone(), config.exposure_ms)
            .with_read_timeout(Duration::from_millis(config.read_timeout_ms))
    }

    /// Maximum wait for a data frame.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Pause inserted after setup commands.
    pub fn with_command_delay(mut self, command_delay: Duration) -> Self {
        self.command_delay = command_delay;
        self
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow!("Spectrometer at {} not connected", self.address))
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        let stream = self.stream()?;
        stream
            .get_mut()
            .write_all(command.as_bytes())
            .await
            .with_context(|| format!("Failed to send '{command}'"))?;
        debug!(command, "Sent spectrometer command");
        Ok(())
    }

    /// Reads one `>`-terminated frame, without the terminator.
    async fn read_frame(&mut self) -> Result<String> {
        let stream = self.stream()?;
        let mut buf = Vec::new();
        let n = stream
            .read_until(FRAME_END, &mut buf)
            .await
            .context("Spectrometer read failed")?;
        if n == 0 || buf.last() != Some(&FRAME_END) {
            bail!("Spectrometer closed the connection");
        }
        buf.pop();
        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    }
}

/// Parses a `<...>` data frame into a spectrum. The closing `>` is optional, so
/// frames already split on the terminator are accepted too.
pub fn parse_data_frame(frame: &str) -> Result<Spectrum> {
    let body = frame
        .trim()
        .strip_prefix('<')
        .ok_or_else(|| anyhow!("Not a data frame: '{frame}'"))?;
    let body = body.strip_suffix(FRAME_END as char).unwrap_or(body);

    let values = body
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid value '{token}' in data frame"))
        })
        .collect::<Result<Vec<f64>>>()?;

    if values.len() % 2 != 0 {
        bail!(
            "Data frame holds an odd number of values ({}), expected shift/intensity pairs",
            values.len()
        );
    }

    let (shifts, intensities) = values.chunks_exact(2).map(|pair| (pair[0], pair[1])).unzip();
    Spectrum::new(shifts, intensities)
}

#[async_trait]
impl Spectrometer for TcpSpectrometer {
    fn name(&self) -> &str {
        "TCP Spectrometer"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = timeout(self.read_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", self.address))?
            .with_context(|| format!("Failed to connect to spectrometer at {}", self.address))?;
        self.stream = Some(BufReader::new(stream));

        self.send("c0>").await?;
        sleep(self.command_delay).await;
        let exposure = format!("#exp={}>", self.exposure_ms);
        self.send(&exposure).await?;
        sleep(self.command_delay * 2).await;

        info!(address = %self.address, exposure_ms = self.exposure_ms, "TCP spectrometer connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        if let Err(err) = self.send("d>").await {
            warn!(error = %err, "Failed to release detector before disconnect");
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
        }
        info!(address = %self.address, "TCP spectrometer disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn acquire_spectrum(&mut self) -> Result<Spectrum> {
        self.send("s>").await?;

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = timeout(remaining, self.read_frame())
                .await
                .map_err(|_| anyhow!("No data frame within {:?}", self.read_timeout))??;

            if frame.starts_with('<') {
                let spectrum = parse_data_frame(&frame)?;
                debug!(samples = spectrum.len(), "TCP spectrum acquired");
                return Ok(spectrum);
            }
            debug!(frame = %frame, "Skipping non-data frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_data_frame() {
        let spectrum = parse_data_frame("<100 1.5 200 2.5 300 0>").unwrap();
        assert_eq!(spectrum.shifts(), &[100.0, 200.0, 300.0]);
        assert_eq!(spectrum.intensities(), &[1.5, 2.5, 0.0]);

        // Body as returned by the reader, terminator already consumed
        let unterminated = parse_data_frame("<100 1.5 200 2.5 300 0").unwrap();
        assert_eq!(unterminated, spectrum);
    }

    #[test]
    fn test_parse_data_frame_rejects_odd_count() {
        let err = parse_data_frame("<100 1.5 200>").unwrap_err();
        assert!(err.to_string().contains("odd number"));
    }

    #[test]
    fn test_parse_data_frame_rejects_garbage() {
        assert!(parse_data_frame("<100 abc>").is_err());
        assert!(parse_data_frame("ok").is_err());
    }

    /// Minimal server: acknowledges setup commands, answers `s>` with a status
    /// frame followed by a data frame, and records everything it receives.
    async fn spawn_server() -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            let mut buf = [0u8; 64];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                received.push_str(&chunk);
                if chunk.contains("s>") {
                    socket.write_all(b"busy><0 1 500 2 1000 3>").await.unwrap();
                }
                if received.ends_with("d>") {
                    break;
                }
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let (addr, server) = spawn_server().await;
        let mut spectrometer =
            TcpSpectrometer::new(addr, 10).with_command_delay(Duration::ZERO);

        assert!(spectrometer.acquire_spectrum().await.is_err());
        spectrometer.connect().await.unwrap();
        assert!(spectrometer.is_connected());

        let spectrum = spectrometer.acquire_spectrum().await.unwrap();
        assert_eq!(spectrum.shifts(), &[0.0, 500.0, 1000.0]);
        assert_eq!(spectrum.intensities(), &[1.0, 2.0, 3.0]);

        spectrometer.disconnect().await.unwrap();
        assert!(!spectrometer.is_connected());

        let received = server.await.unwrap();
        assert_eq!(received, "c0>#exp=10>s>d>");
    }
}
