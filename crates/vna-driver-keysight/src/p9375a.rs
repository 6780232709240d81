//! Keysight P9375A Streamline USB VNA Driver
//!
//! Reference: Keysight Streamline Series USB VNA Programming Guide
//!
//! Protocol Overview:
//! - Format: SCPI over the instrument's raw command socket (default port 5025)
//! - Terminator: LF (\n) on both directions
//! - Channel-scoped commands: SENS<ch>:..., INIT<ch>:..., CALC<ch>:...
//! - Bulk transfers: IEEE-488.2 definite-length blocks (MMEM:TRAN?)
//!
//! The driver resets the instrument on connect by default (*CLS + *RST) so a
//! session starts from the preset state, matching the bench workflow the
//! instrument is used in.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vna_driver_keysight::P9375aFactory;
//! use vna_core::driver::DriverFactory;
//!
//! // Register the factory
//! registry.register_factory(Box::new(P9375aFactory));
//!
//! // Create via config
//! let config = toml::toml! {
//!     host = "192.168.1.50"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use vna_core::capabilities::{DeviceCategory, Settable, SweepControl};
use vna_core::driver::{Capability, DeviceComponents, DriverFactory};
use vna_core::scpi::{connect_tcp, wrap_shared, DynStream, ScpiConnection};

/// Channel the capability trait impls operate on.
///
/// The instrument powers up with channel 1 active; per-channel access goes
/// through [`P9375aDriver::channel`].
pub(crate) const PRIMARY_CHANNEL: u8 = 1;

// =============================================================================
// P9375aFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the P9375A driver
#[derive(Debug, Clone, Deserialize)]
pub struct P9375aConfig {
    /// Instrument hostname or IP address
    pub host: String,
    /// SCPI socket port (default: 5025)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Command timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Reset the instrument on connect (default: true)
    #[serde(default = "default_reset_on_connect")]
    pub reset_on_connect: bool,
}

fn default_port() -> u16 {
    5025
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_reset_on_connect() -> bool {
    true
}

impl P9375aConfig {
    /// Command timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Factory for creating P9375A driver instances.
pub struct P9375aFactory;

/// Static capabilities for the P9375A
static P9375A_CAPABILITIES: &[Capability] = &[
    Capability::SweepControl,
    Capability::Settable,
    Capability::SnpSource,
];

impl DriverFactory for P9375aFactory {
    fn driver_type(&self) -> &'static str {
        "keysight_p9375a"
    }

    fn name(&self) -> &'static str {
        "Keysight P9375A Streamline USB VNA"
    }

    fn capabilities(&self) -> &'static [Capability] {
        P9375A_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: P9375aConfig = config.clone().try_into()?;
        if cfg.timeout_ms == 0 {
            return Err(anyhow!("P9375A timeout_ms must be non-zero"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: P9375aConfig = config.try_into().context("Invalid P9375A config")?;

            let driver = Arc::new(P9375aDriver::new_async(&cfg).await?);

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::NetworkAnalyzer)
                .with_sweep(driver.clone())
                .with_settable(driver.clone())
                .with_snp(driver))
        })
    }
}

// =============================================================================
// P9375aDriver
// =============================================================================

/// Driver for the Keysight P9375A vector network analyzer.
///
/// Implements SweepControl, Settable and SnpSource capability traits.
/// Channel-scoped properties are reached through [`Self::channel`].
pub struct P9375aDriver {
    /// Request/response adapter over the SCPI socket
    conn: ScpiConnection,
    /// Instrument identity (*IDN? response), cached at connect
    identity: Option<String>,
}

impl P9375aDriver {
    /// Connect to the instrument and validate its identity.
    ///
    /// This is the **preferred constructor** for production use. Resets the
    /// instrument first when `reset_on_connect` is set (the default).
    ///
    /// # Errors
    /// Returns error if:
    /// - The SCPI socket cannot be connected within the configured timeout
    /// - The instrument does not answer the identity query
    pub async fn new_async(cfg: &P9375aConfig) -> Result<Self> {
        let timeout = cfg.timeout();
        let stream = tokio::time::timeout(timeout, connect_tcp(&cfg.host, cfg.port, "P9375A"))
            .await
            .map_err(|_| anyhow!("P9375A connect to {}:{} timed out", cfg.host, cfg.port))??;

        let mut driver = Self::from_stream(Box::new(stream), timeout);

        if cfg.reset_on_connect {
            driver
                .reset()
                .await
                .context("P9375A reset on connect failed")?;
        }

        let identity = driver
            .conn
            .query("*IDN?")
            .await
            .context("P9375A validation failed: no response to identity query")?;
        if identity.is_empty() {
            return Err(anyhow!("P9375A validation failed: empty *IDN? response"));
        }
        if !identity.contains("P9375A") {
            tracing::warn!(identity = %identity, "instrument did not identify as a P9375A");
        }
        tracing::info!(identity = %identity, "P9375A connected");
        driver.identity = Some(identity);

        Ok(driver)
    }

    /// Create a driver over an already-open stream.
    ///
    /// No I/O is performed and no identity check runs; the caller is
    /// responsible for the stream being connected to a P9375A (or a stand-in,
    /// in tests and alternate transports).
    pub fn from_stream(stream: DynStream, timeout: Duration) -> Self {
        Self {
            conn: ScpiConnection::new(wrap_shared(stream), timeout),
            identity: None,
        }
    }

    /// The cached instrument identity, if the driver connected itself.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The underlying request/response adapter.
    pub(crate) fn conn(&self) -> &ScpiConnection {
        &self.conn
    }

    /// Clear status and reset the instrument to its preset state.
    pub async fn reset(&self) -> Result<()> {
        self.conn.write("*CLS").await?;
        self.conn.write("*RST").await?;
        // Gate on completion so the next command lands on a settled preset.
        self.operation_complete(self.conn.default_timeout()).await?;
        Ok(())
    }

    /// Query operation complete (*OPC?).
    ///
    /// The instrument holds the response until all pending overlapped
    /// commands (sweeps, file saves) have finished, so this doubles as the
    /// blocking wait used by the sweep and save sequences.
    pub async fn operation_complete(&self, timeout: Duration) -> Result<bool> {
        let response = self
            .conn
            .query_timeout("*OPC?", timeout)
            .await
            .context("Failed to query operation complete")?;
        Ok(response.trim() == "1")
    }

    /// Access channel-scoped properties.
    pub fn channel(&self, number: u8) -> P9375aChannel<'_> {
        P9375aChannel {
            driver: self,
            number,
        }
    }
}

// =============================================================================
// P9375aChannel - channel-scoped properties
// =============================================================================

/// Handle for one measurement channel of the instrument.
///
/// Each accessor is a direct mapping from a SCPI get/set command pair to a
/// typed value; the instrument itself validates ranges and rounds to what
/// the hardware supports.
pub struct P9375aChannel<'a> {
    driver: &'a P9375aDriver,
    number: u8,
}

impl P9375aChannel<'_> {
    /// The channel number this handle addresses.
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Number of frequency points measured per sweep.
    pub async fn scan_points(&self) -> Result<u32> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:SWE:POIN?", self.number))
            .await?;
        parse_u32(&response)
    }

    /// Set the number of frequency points measured per sweep.
    pub async fn set_scan_points(&self, points: u32) -> Result<()> {
        self.driver
            .conn
            .write(&format!("SENS{}:SWE:POIN {}", self.number, points))
            .await?;
        Ok(())
    }

    /// IF bandwidth in Hz.
    pub async fn if_bandwidth_hz(&self) -> Result<f64> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:BAND?", self.number))
            .await?;
        parse_f64(&response)
    }

    /// Set the IF bandwidth in Hz.
    pub async fn set_if_bandwidth_hz(&self, bandwidth: f64) -> Result<()> {
        self.driver
            .conn
            .write(&format!("SENS{}:BAND {}", self.number, bandwidth))
            .await?;
        Ok(())
    }

    /// Number of sweeps combined by averaging.
    pub async fn averaging_count(&self) -> Result<u32> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:AVER:COUN?", self.number))
            .await?;
        parse_u32(&response)
    }

    /// Set the number of sweeps combined by averaging.
    pub async fn set_averaging_count(&self, count: u32) -> Result<()> {
        self.driver
            .conn
            .write(&format!("SENS{}:AVER:COUN {}", self.number, count))
            .await?;
        Ok(())
    }

    /// Whether trace averaging is enabled.
    pub async fn averaging_enabled(&self) -> Result<bool> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:AVER:STAT?", self.number))
            .await?;
        parse_bool(&response)
    }

    /// Enable or disable trace averaging.
    pub async fn set_averaging_enabled(&self, enabled: bool) -> Result<()> {
        self.driver
            .conn
            .write(&format!(
                "SENS{}:AVER:STAT {}",
                self.number,
                u8::from(enabled)
            ))
            .await?;
        Ok(())
    }

    /// Averaging mode mnemonic (e.g. `AUTO`, `FLAT`).
    pub async fn averaging_mode(&self) -> Result<String> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:AVER:MODE?", self.number))
            .await?;
        Ok(response)
    }

    /// Set the averaging mode mnemonic.
    pub async fn set_averaging_mode(&self, mode: &str) -> Result<()> {
        self.driver
            .conn
            .write(&format!("SENS{}:AVER:MODE {}", self.number, mode))
            .await?;
        Ok(())
    }

    /// Dwell time per point in seconds.
    pub async fn dwell_time_s(&self) -> Result<f64> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:SWE:DWEL?", self.number))
            .await?;
        parse_f64(&response)
    }

    /// Set the dwell time per point in seconds.
    pub async fn set_dwell_time_s(&self, dwell: f64) -> Result<()> {
        self.driver
            .conn
            .write(&format!("SENS{}:SWE:DWEL {}", self.number, dwell))
            .await?;
        Ok(())
    }

    /// Whether error correction (calibration) is applied.
    pub async fn correction_enabled(&self) -> Result<bool> {
        let response = self
            .driver
            .conn
            .query(&format!("SENS{}:CORR:STAT?", self.number))
            .await?;
        parse_bool(&response)
    }

    /// Enable or disable error correction.
    pub async fn set_correction_enabled(&self, enabled: bool) -> Result<()> {
        self.driver
            .conn
            .write(&format!(
                "SENS{}:CORR:STAT {}",
                self.number,
                u8::from(enabled)
            ))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Response parsing
// =============================================================================

pub(crate) fn parse_u32(response: &str) -> Result<u32> {
    // Integer responses may carry a sign or arrive in exponent form,
    // e.g. "+201" or "2.01E2".
    let trimmed = response.trim().trim_start_matches('+');
    trimmed
        .parse::<u32>()
        .or_else(|_| trimmed.parse::<f64>().map(|v| v as u32))
        .with_context(|| format!("Failed to parse SCPI response as integer: '{}'", response))
}

pub(crate) fn parse_f64(response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Failed to parse SCPI response as f64: '{}'", response))
}

pub(crate) fn parse_bool(response: &str) -> Result<bool> {
    match response.trim() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        other => Err(anyhow!("Unexpected SCPI boolean response: '{}'", other)),
    }
}

// =============================================================================
// Capability implementations
// =============================================================================

#[async_trait]
impl SweepControl for P9375aDriver {
    #[instrument(skip(self), err)]
    async fn set_continuous(&self, enabled: bool) -> Result<()> {
        self.conn
            .write(&format!(
                "INIT{}:CONT {}",
                PRIMARY_CHANNEL,
                u8::from(enabled)
            ))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn continuous(&self) -> Result<bool> {
        let response = self
            .conn
            .query(&format!("INIT{}:CONT?", PRIMARY_CHANNEL))
            .await?;
        parse_bool(&response)
    }

    #[instrument(skip(self), err)]
    async fn single_sweep(&self) -> Result<()> {
        self.conn
            .write(&format!("INIT{}:IMM", PRIMARY_CHANNEL))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn wait_complete(&self, timeout: Duration) -> Result<()> {
        if self.operation_complete(timeout).await? {
            Ok(())
        } else {
            Err(anyhow!("operation-complete poll returned an unexpected response"))
        }
    }
}

#[async_trait]
impl Settable for P9375aDriver {
    #[instrument(skip(self, value), err)]
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()> {
        let channel = self.channel(PRIMARY_CHANNEL);
        match name {
            "scan_points" => {
                channel.set_scan_points(json_u32(name, &value)?).await
            }
            "if_bandwidth_hz" => {
                channel.set_if_bandwidth_hz(json_f64(name, &value)?).await
            }
            "averaging_count" => {
                channel.set_averaging_count(json_u32(name, &value)?).await
            }
            "averaging_enabled" => {
                channel.set_averaging_enabled(json_bool(name, &value)?).await
            }
            "averaging_mode" => {
                channel.set_averaging_mode(json_str(name, &value)?).await
            }
            "dwell_time_s" => channel.set_dwell_time_s(json_f64(name, &value)?).await,
            "correction_enabled" => {
                channel
                    .set_correction_enabled(json_bool(name, &value)?)
                    .await
            }
            other => Err(anyhow!("Unknown P9375A parameter '{}'", other)),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_value(&self, name: &str) -> Result<serde_json::Value> {
        let channel = self.channel(PRIMARY_CHANNEL);
        let value = match name {
            "scan_points" => serde_json::json!(channel.scan_points().await?),
            "if_bandwidth_hz" => serde_json::json!(channel.if_bandwidth_hz().await?),
            "averaging_count" => serde_json::json!(channel.averaging_count().await?),
            "averaging_enabled" => serde_json::json!(channel.averaging_enabled().await?),
            "averaging_mode" => serde_json::json!(channel.averaging_mode().await?),
            "dwell_time_s" => serde_json::json!(channel.dwell_time_s().await?),
            "correction_enabled" => serde_json::json!(channel.correction_enabled().await?),
            other => return Err(anyhow!("Unknown P9375A parameter '{}'", other)),
        };
        Ok(value)
    }
}

fn json_u32(name: &str, value: &serde_json::Value) -> Result<u32> {
    let v = value
        .as_u64()
        .ok_or_else(|| anyhow!("Parameter '{}' expects an unsigned integer", name))?;
    u32::try_from(v).with_context(|| format!("Parameter '{}' out of range: {}", name, v))
}

fn json_f64(name: &str, value: &serde_json::Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow!("Parameter '{}' expects a number", name))
}

fn json_bool(name: &str, value: &serde_json::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow!("Parameter '{}' expects a boolean", name))
}

fn json_str<'v>(name: &str, value: &'v serde_json::Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("Parameter '{}' expects a string", name))
}
