//! Capability traits for swept-frequency instruments.
//!
//! Drivers implement the subset of these traits their hardware supports and
//! hand them to the registry through
//! [`DeviceComponents`](crate::driver::DeviceComponents). Callers program
//! against the traits, never against a concrete driver type.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Device Category
// =============================================================================

/// Device category for registry listings and UI grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Vector network analyzers and similar swept-frequency instruments
    NetworkAnalyzer,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkAnalyzer => "Network Analyzers",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Sweep Control
///
/// Swept instruments that can run free (continuous triggering) or take a
/// single triggered sweep on demand.
///
/// # Contract
/// - `set_continuous(false)` holds the instrument after its current sweep
/// - `single_sweep()` arms and triggers one immediate sweep; it may return
///   before the sweep finishes
/// - `wait_complete()` blocks until the instrument reports the pending
///   operation finished
#[async_trait]
pub trait SweepControl: Send + Sync {
    /// Enable or disable continuous (free-running) triggering.
    async fn set_continuous(&self, enabled: bool) -> Result<()>;

    /// Query whether continuous triggering is enabled.
    async fn continuous(&self) -> Result<bool>;

    /// Trigger one immediate sweep.
    async fn single_sweep(&self) -> Result<()>;

    /// Block until the instrument reports the pending operation complete.
    ///
    /// # Errors
    /// Returns an error if the instrument does not signal completion within
    /// `timeout`.
    async fn wait_complete(&self, timeout: Duration) -> Result<()>;
}

/// Capability: Settable (Configurable Parameters)
///
/// Devices that have parameters which can be set and optionally queried.
///
/// # Contract
/// - `set_value()` sets the parameter to a new value.
/// - `get_value()` queries the current value of the parameter.
/// - Values are represented as `serde_json::Value` to allow flexibility
///   (f64, i64, bool, string, enum).
/// - Methods take `&self` to allow use with `Arc<dyn Settable>`;
///   implementations use interior mutability for state changes.
#[async_trait]
pub trait Settable: Send + Sync {
    /// Set a named parameter to a new value.
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Get the current value of a named parameter.
    async fn get_value(&self, name: &str) -> Result<serde_json::Value> {
        anyhow::bail!("Get value for '{}' not supported by this device", name)
    }
}

// =============================================================================
// Touchstone Save-and-Fetch
// =============================================================================

/// Numeric formatting of S-parameter data in a saved Touchstone file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnpFormat {
    /// Real and imaginary parts
    Ri,
    /// Linear magnitude and angle
    Ma,
    /// Log magnitude (dB) and angle
    Db,
    /// Whatever format the instrument's display currently uses
    #[default]
    Auto,
}

impl SnpFormat {
    /// SCPI mnemonic for the stored-data format command.
    pub fn as_scpi(&self) -> &'static str {
        match self {
            Self::Ri => "RI",
            Self::Ma => "MA",
            Self::Db => "DB",
            Self::Auto => "AUTO",
        }
    }
}

/// Parameters of one Touchstone save-and-fetch invocation.
///
/// The `timeout` applies to every exchange of the invocation and never
/// outlives it — the connection's default timeout is untouched.
#[derive(Debug, Clone)]
pub struct SnpRequest {
    /// Destination path on the instrument's own filesystem.
    pub remote_path: String,
    /// Port list as the instrument expects it, e.g. `"1"` or `"1,2"`.
    pub ports: String,
    /// SCPI channel number.
    pub channel: u8,
    /// SCPI measurement number named in the save command.
    pub measurement: u8,
    /// Numeric formatting of the stored data.
    pub format: SnpFormat,
    /// Take one immediate sweep before saving instead of using whatever the
    /// current trigger mode has produced.
    pub single_sweep: bool,
    /// Local destination; `None` leaves the file on the instrument.
    pub fetch_to: Option<PathBuf>,
    /// Timeout applied to every exchange of this invocation.
    pub timeout: Duration,
}

impl SnpRequest {
    /// Create a request with default channel 1, measurement 1, automatic
    /// format, no forced sweep, no local fetch, 10 s timeout.
    pub fn new(remote_path: impl Into<String>, ports: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            ports: ports.into(),
            channel: 1,
            measurement: 1,
            format: SnpFormat::Auto,
            single_sweep: false,
            fetch_to: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Select the SCPI channel.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Select the SCPI measurement number named in the save command.
    pub fn with_measurement(mut self, measurement: u8) -> Self {
        self.measurement = measurement;
        self
    }

    /// Select the stored-data format.
    pub fn with_format(mut self, format: SnpFormat) -> Self {
        self.format = format;
        self
    }

    /// Force one immediate sweep before saving.
    pub fn with_single_sweep(mut self, single_sweep: bool) -> Self {
        self.single_sweep = single_sweep;
        self
    }

    /// Fetch the saved file to a local path after saving.
    pub fn with_fetch_to(mut self, local: impl Into<PathBuf>) -> Self {
        self.fetch_to = Some(local.into());
        self
    }

    /// Override the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Capability: Touchstone File Source
///
/// Instruments that can persist S-parameter data as a Touchstone (SnP) file
/// on their own filesystem and optionally transfer it to the host.
///
/// # Contract
/// - `save_snp()` drives the whole sequence: measurement activation, optional
///   single sweep, save, optional fetch
/// - Returns `Ok(Some(path))` with the local path written, or `Ok(None)` when
///   no fetch was requested
/// - A malformed or truncated transfer aborts the call with an error; no step
///   is retried
#[async_trait]
pub trait SnpSource: Send + Sync {
    /// Save a Touchstone file on the instrument and optionally fetch it.
    async fn save_snp(&self, request: &SnpRequest) -> Result<Option<PathBuf>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snp_format_scpi_mnemonics() {
        assert_eq!(SnpFormat::Ri.as_scpi(), "RI");
        assert_eq!(SnpFormat::Ma.as_scpi(), "MA");
        assert_eq!(SnpFormat::Db.as_scpi(), "DB");
        assert_eq!(SnpFormat::Auto.as_scpi(), "AUTO");
        assert_eq!(SnpFormat::default(), SnpFormat::Auto);
    }

    #[test]
    fn snp_request_builder_defaults() {
        let request = SnpRequest::new("dut.s2p", "1,2");
        assert_eq!(request.channel, 1);
        assert_eq!(request.measurement, 1);
        assert_eq!(request.format, SnpFormat::Auto);
        assert!(!request.single_sweep);
        assert!(request.fetch_to.is_none());

        let request = request
            .with_channel(2)
            .with_format(SnpFormat::Db)
            .with_fetch_to("/tmp/dut.s2p");
        assert_eq!(request.channel, 2);
        assert_eq!(request.format, SnpFormat::Db);
        assert_eq!(request.fetch_to.as_deref(), Some(std::path::Path::new("/tmp/dut.s2p")));
    }

    #[test]
    fn device_category_labels() {
        assert_eq!(DeviceCategory::NetworkAnalyzer.label(), "Network Analyzers");
        assert_eq!(DeviceCategory::default(), DeviceCategory::Other);
    }
}
