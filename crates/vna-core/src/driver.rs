//! Driver factory and component types.
//!
//! Drivers implement [`DriverFactory`] and are registered with a device
//! registry at startup via explicit `registry.register_factory(factory)`
//! calls. The factory validates a TOML config table, asynchronously
//! constructs the driver, and returns a [`DeviceComponents`] bag holding the
//! capability trait objects the device supports.
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use vna_core::driver::{Capability, DeviceComponents, DriverFactory};
//! use futures::future::BoxFuture;
//! use std::sync::Arc;
//!
//! pub struct MyVnaFactory;
//!
//! impl DriverFactory for MyVnaFactory {
//!     fn driver_type(&self) -> &'static str { "my_vna" }
//!     fn name(&self) -> &'static str { "My VNA" }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let _: MyVnaConfig = config.clone().try_into()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let driver = Arc::new(MyVnaDriver::new_async(config.try_into()?).await?);
//!             Ok(DeviceComponents::new()
//!                 .with_sweep(driver.clone())
//!                 .with_snp(driver))
//!         })
//!     }
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::capabilities::{DeviceCategory, Settable, SnpSource, SweepControl};

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
///
/// Mirrors the capability traits as an enum so callers can list or match on
/// what a device supports without checking each trait object individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Controls sweep triggering
    /// Corresponds to [`crate::capabilities::SweepControl`]
    SweepControl,

    /// Has settable parameters
    /// Corresponds to [`crate::capabilities::Settable`]
    Settable,

    /// Saves and transfers Touchstone files
    /// Corresponds to [`crate::capabilities::SnpSource`]
    SnpSource,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SweepControl => "Sweep Control",
            Self::Settable => "Settable",
            Self::SnpSource => "Touchstone Source",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// Each capability is stored separately so lookups stay compile-time typed:
/// no runtime downcasting, and drivers implement only what they need.
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for registry grouping
    pub category: Option<DeviceCategory>,

    /// SweepControl implementation (trigger mode, single sweep)
    pub sweep: Option<Arc<dyn SweepControl>>,

    /// Settable implementation (named parameters)
    pub settable: Option<Arc<dyn Settable>>,

    /// SnpSource implementation (Touchstone save-and-fetch)
    pub snp: Option<Arc<dyn SnpSource>>,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.sweep.is_some() {
            caps.push(Capability::SweepControl);
        }
        if self.settable.is_some() {
            caps.push(Capability::Settable);
        }
        if self.snp.is_some() {
            caps.push(Capability::SnpSource);
        }

        caps
    }

    // Builder methods

    /// Set device category
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set SweepControl implementation
    pub fn with_sweep(mut self, s: Arc<dyn SweepControl>) -> Self {
        self.sweep = Some(s);
        self
    }

    /// Set Settable implementation
    pub fn with_settable(mut self, s: Arc<dyn Settable>) -> Self {
        self.settable = Some(s);
        self
    }

    /// Set SnpSource implementation
    pub fn with_snp(mut self, s: Arc<dyn SnpSource>) -> Self {
        self.snp = Some(s);
        self
    }
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// Factories are registered once at startup and live for the program's
/// lifetime, so they must be `Send + Sync + 'static` and hold no mutable
/// state across builds.
///
/// Both `validate()` and `build()` return `Result`. Validation errors should
/// be descriptive and actionable; build errors may include hardware
/// connection failures.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in the TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    ///
    /// Used for introspection and documentation; the actual capabilities are
    /// whatever `build()` populates.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    ///
    /// Called before `build()` to provide early error feedback.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Parses the configuration, opens the connection to the instrument,
    /// optionally validates device identity, and returns the populated
    /// [`DeviceComponents`].
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_name() {
        assert_eq!(Capability::SweepControl.name(), "Sweep Control");
        assert_eq!(Capability::SnpSource.name(), "Touchstone Source");
    }

    #[test]
    fn test_capability_serde() {
        let json = serde_json::to_string(&Capability::SweepControl).unwrap();
        assert_eq!(json, "\"sweep_control\"");

        let cap: Capability = serde_json::from_str("\"snp_source\"").unwrap();
        assert_eq!(cap, Capability::SnpSource);
    }

    #[test]
    fn test_device_components_capabilities() {
        // Empty components should have no capabilities
        let empty = DeviceComponents::new();
        assert!(empty.capabilities().is_empty());
        assert!(empty.category.is_none());
    }

    #[test]
    fn test_device_components_builder() {
        let components =
            DeviceComponents::new().with_category(DeviceCategory::NetworkAnalyzer);
        assert_eq!(components.category, Some(DeviceCategory::NetworkAnalyzer));
    }
}
