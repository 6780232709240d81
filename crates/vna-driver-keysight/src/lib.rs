//! Keysight hardware drivers for vna-daq.
//!
//! This crate provides drivers for Keysight network analyzers, including:
//! - P9375A Streamline USB VNA (SCPI over socket)
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! vna-driver-keysight = { path = "../vna-driver-keysight" }
//! ```
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use vna_driver_keysight::P9375aFactory;
//!
//! registry.register_factory(Box::new(P9375aFactory));
//! ```

pub mod p9375a;
pub mod snp;

pub use p9375a::{P9375aChannel, P9375aConfig, P9375aDriver, P9375aFactory};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<P9375aFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
