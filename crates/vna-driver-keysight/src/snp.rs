//! Touchstone (SnP) save-and-fetch orchestration.
//!
//! Producing a Touchstone file takes more than one command: the channel must
//! hold a measurement for every S-parameter the port list needs, the sweep
//! must have produced data, and the file written on the instrument's own
//! filesystem comes back to the host as an IEEE-488.2 definite-length block.
//! This module drives that sequence for the P9375A.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::instrument;
use vna_core::block;
use vna_core::capabilities::{SnpRequest, SnpSource};

use crate::p9375a::{parse_bool, P9375aDriver};

/// Compute the S-parameter identifiers a port list requires.
///
/// A single port `p` needs only its reflection parameter `Spp`. Any
/// multi-port list maps to the full 2-port set: the P9375A is a 2-port
/// instrument, so the full set covers every valid multi-port request.
///
/// # Errors
/// Returns an error for an empty port list or a non-numeric single port.
pub fn required_sparams(ports: &str) -> Result<BTreeSet<String>> {
    let ports: Vec<&str> = ports
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    match ports.as_slice() {
        [] => Err(anyhow!("Empty port list")),
        [single] => {
            let p: u8 = single
                .parse()
                .with_context(|| format!("Invalid port number '{}'", single))?;
            Ok(BTreeSet::from([format!("S{p}{p}")]))
        }
        _ => Ok(["S11", "S21", "S22", "S12"]
            .into_iter()
            .map(String::from)
            .collect()),
    }
}

/// Parse a `CALC<ch>:PAR:CAT:EXT?` response into defined parameter names.
///
/// The instrument answers with a quoted, comma-separated list of
/// name/parameter pairs, e.g. `"CH1_S11_1,S11,CH1_S21_2,S21"`, or
/// `"NO CATALOG"` when the channel has no measurements.
pub fn parse_catalog(response: &str) -> BTreeSet<String> {
    let inner = response.trim().trim_matches('"').trim();
    if inner.is_empty() || inner.eq_ignore_ascii_case("NO CATALOG") {
        return BTreeSet::new();
    }

    inner
        .split(',')
        .skip(1)
        .step_by(2)
        .map(|param| param.trim().to_ascii_uppercase())
        .collect()
}

impl P9375aDriver {
    async fn save_snp_sequence(&self, request: &SnpRequest) -> Result<Option<PathBuf>> {
        let timeout = request.timeout;
        let conn = self.conn();
        let ch = request.channel;

        // Stored-data format for the save command.
        conn.write(&format!(
            "MMEM:STOR:TRAC:FORM:SNP {}",
            request.format.as_scpi()
        ))
        .await?;

        // Make sure every required S-parameter has a measurement defined.
        let required = required_sparams(&request.ports)?;
        let catalog = conn
            .query_timeout(&format!("CALC{ch}:PAR:CAT:EXT?"), timeout)
            .await?;
        let defined = parse_catalog(&catalog);
        for param in required.iter().filter(|p| !defined.contains(*p)) {
            tracing::debug!(channel = ch, param = %param, "defining missing measurement");
            conn.write(&format!("CALC{ch}:PAR:EXT '{param}',{param}"))
                .await?;
        }

        // Take one immediate sweep, remembering the trigger mode so it can
        // be restored once the save has consumed the data.
        let restore_continuous = if request.single_sweep {
            let was_continuous = parse_bool(
                &conn
                    .query_timeout(&format!("INIT{ch}:CONT?"), timeout)
                    .await?,
            )?;
            conn.write(&format!("INIT{ch}:CONT 0")).await?;
            conn.write(&format!("INIT{ch}:IMM")).await?;
            self.ensure_complete(timeout, "single sweep").await?;
            was_continuous
        } else {
            false
        };

        conn.write(&format!(
            "CALC{ch}:MEAS{}:DATA:SNP:PORT:SAVE '{}','{}'",
            request.measurement, request.ports, request.remote_path
        ))
        .await?;
        self.ensure_complete(timeout, "file save").await?;

        if restore_continuous {
            conn.write(&format!("INIT{ch}:CONT 1")).await?;
        }

        let Some(local) = &request.fetch_to else {
            tracing::info!(remote = %request.remote_path, "Touchstone file left on instrument");
            return Ok(None);
        };

        let raw = conn
            .query_raw(&format!("MMEM:TRAN? '{}'", request.remote_path), timeout)
            .await?;
        let payload = block::decode_bytes(&raw)?;

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create parent directories for {}", local.display())
            })?;
        }
        tokio::fs::write(local, &payload)
            .await
            .with_context(|| format!("Failed to write {}", local.display()))?;

        tracing::info!(
            remote = %request.remote_path,
            local = %local.display(),
            bytes = payload.len(),
            "Touchstone file fetched"
        );
        Ok(Some(local.clone()))
    }

    async fn ensure_complete(&self, timeout: Duration, what: &str) -> Result<()> {
        if self.operation_complete(timeout).await? {
            Ok(())
        } else {
            Err(anyhow!("P9375A did not report {} complete", what))
        }
    }
}

#[async_trait]
impl SnpSource for P9375aDriver {
    #[instrument(
        skip(self, request),
        fields(remote = %request.remote_path, ports = %request.ports),
        err
    )]
    async fn save_snp(&self, request: &SnpRequest) -> Result<Option<PathBuf>> {
        self.save_snp_sequence(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(params: &[&str]) -> BTreeSet<String> {
        params.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn single_port_needs_its_reflection_parameter() {
        assert_eq!(required_sparams("1").unwrap(), set(&["S11"]));
        assert_eq!(required_sparams("2").unwrap(), set(&["S22"]));
    }

    #[test]
    fn multi_port_needs_the_full_two_port_set() {
        let full = set(&["S11", "S12", "S21", "S22"]);
        assert_eq!(required_sparams("1,2").unwrap(), full);
        assert_eq!(required_sparams(" 2 , 1 ").unwrap(), full);
    }

    #[test]
    fn port_list_errors() {
        assert!(required_sparams("").is_err());
        assert!(required_sparams(" , ").is_err());
        assert!(required_sparams("x").is_err());
    }

    #[test]
    fn catalog_parses_name_parameter_pairs() {
        let defined = parse_catalog("\"CH1_S11_1,S11,CH1_S21_2,S21\"");
        assert_eq!(defined, set(&["S11", "S21"]));
    }

    #[test]
    fn catalog_handles_empty_channel() {
        assert!(parse_catalog("\"NO CATALOG\"").is_empty());
        assert!(parse_catalog("\"\"").is_empty());
        assert!(parse_catalog("").is_empty());
    }

    #[test]
    fn catalog_normalizes_parameter_case() {
        let defined = parse_catalog("\"my_meas,s11\"");
        assert_eq!(defined, set(&["S11"]));
    }
}
