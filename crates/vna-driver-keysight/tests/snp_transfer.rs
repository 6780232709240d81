//! Integration tests for the P9375A Touchstone save-and-fetch, driven
//! against a scripted mock instrument on the far side of an in-memory
//! stream.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex;

use std::sync::Arc;

use vna_core::{block, SnpFormat, SnpRequest, SnpSource};
use vna_driver_keysight::P9375aDriver;

/// Commands the mock instrument received, in order.
type CommandLog = Arc<Mutex<Vec<String>>>;

/// Spawn a mock instrument on the far side of a duplex stream.
///
/// Every received line is logged. Queries are answered from `responses`
/// (keyed by the full command line); write commands are logged and ignored,
/// as a real SCPI instrument would. Unknown queries get a parseable filler
/// answer rather than hanging the test.
fn spawn_mock_instrument(
    stream: DuplexStream,
    responses: HashMap<String, Vec<u8>>,
) -> CommandLog {
    let log: CommandLog = Arc::default();
    let task_log = log.clone();

    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = line.trim().to_string();
            task_log.lock().await.push(command.clone());

            if let Some(response) = responses.get(&command) {
                if write_half.write_all(response).await.is_err() {
                    break;
                }
            } else if command.ends_with('?') {
                if write_half.write_all(b"0\n").await.is_err() {
                    break;
                }
            }
        }
    });

    log
}

fn test_driver(responses: HashMap<String, Vec<u8>>) -> (P9375aDriver, CommandLog) {
    let (client, device) = tokio::io::duplex(4096);
    let log = spawn_mock_instrument(device, responses);
    let driver = P9375aDriver::from_stream(Box::new(client), Duration::from_secs(2));
    (driver, log)
}

fn canned(value: &[u8]) -> Vec<u8> {
    value.to_vec()
}

#[tokio::test]
async fn save_and_fetch_writes_local_file() -> anyhow::Result<()> {
    let payload: &[u8] = b"! 2-port S-parameter file\n# Hz S RI R 50\n1000000 0.1 -0.2 0.9 0.0 0.9 0.0 0.1 -0.2\n";
    let mut transfer = block::encode(payload);
    transfer.push(b'\n');

    let mut responses = HashMap::new();
    responses.insert(
        "CALC1:PAR:CAT:EXT?".to_string(),
        canned(b"\"CH1_S11_1,S11\"\n"),
    );
    responses.insert("INIT1:CONT?".to_string(), canned(b"1\n"));
    responses.insert("*OPC?".to_string(), canned(b"1\n"));
    responses.insert("MMEM:TRAN? 'dut.s2p'".to_string(), transfer);

    let (driver, log) = test_driver(responses);

    let dir = tempfile::tempdir()?;
    let local = dir.path().join("touchstone").join("dut.s2p");
    let request = SnpRequest::new("dut.s2p", "1,2")
        .with_format(SnpFormat::Ri)
        .with_single_sweep(true)
        .with_fetch_to(local.clone());

    let written = driver.save_snp(&request).await?;
    assert_eq!(written, Some(local.clone()));
    assert_eq!(std::fs::read(&local)?, payload);

    let log = log.lock().await;
    assert!(log.contains(&"MMEM:STOR:TRAC:FORM:SNP RI".to_string()));

    // S11 already had a measurement; only the other three get defined.
    for param in ["S12", "S21", "S22"] {
        let create = format!("CALC1:PAR:EXT '{param}',{param}");
        assert!(log.contains(&create), "missing {create}");
    }
    assert!(!log.contains(&"CALC1:PAR:EXT 'S11',S11".to_string()));

    // Single-sweep bracket: hold, trigger, then restore continuous mode.
    assert!(log.contains(&"INIT1:CONT 0".to_string()));
    assert!(log.contains(&"INIT1:IMM".to_string()));
    assert!(log.contains(&"INIT1:CONT 1".to_string()));

    assert!(log.contains(&"CALC1:MEAS1:DATA:SNP:PORT:SAVE '1,2','dut.s2p'".to_string()));
    Ok(())
}

#[tokio::test]
async fn save_without_fetch_issues_no_transfer_query() -> anyhow::Result<()> {
    let mut responses = HashMap::new();
    responses.insert(
        "CALC1:PAR:CAT:EXT?".to_string(),
        canned(b"\"CH1_S11_1,S11,CH1_S21_2,S21,CH1_S22_3,S22,CH1_S12_4,S12\"\n"),
    );
    responses.insert("*OPC?".to_string(), canned(b"1\n"));

    let (driver, log) = test_driver(responses);

    let request = SnpRequest::new("dut.s2p", "1");
    let written = driver.save_snp(&request).await?;
    assert_eq!(written, None);

    let log = log.lock().await;
    // Every required measurement existed and no sweep was forced.
    assert!(!log.iter().any(|c| c.starts_with("CALC1:PAR:EXT ")));
    assert!(!log.iter().any(|c| c.starts_with("INIT")));
    // No local destination means no transfer query.
    assert!(!log.iter().any(|c| c.starts_with("MMEM:TRAN?")));
    Ok(())
}

#[tokio::test]
async fn truncated_transfer_fails_loudly() -> anyhow::Result<()> {
    let mut responses = HashMap::new();
    responses.insert("CALC1:PAR:CAT:EXT?".to_string(), canned(b"\"NO CATALOG\"\n"));
    responses.insert("*OPC?".to_string(), canned(b"1\n"));
    // Header declares 100 bytes, far fewer follow.
    responses.insert("MMEM:TRAN? 'dut.s1p'".to_string(), canned(b"#3100abc\n"));

    let (driver, log) = test_driver(responses);

    let dir = tempfile::tempdir()?;
    let local = dir.path().join("dut.s1p");
    let request = SnpRequest::new("dut.s1p", "1").with_fetch_to(local.clone());

    let err = driver.save_snp(&request).await.unwrap_err();
    assert!(err.to_string().contains("truncated"), "unexpected error: {err:#}");
    assert!(!local.exists(), "no file must be written on a failed decode");

    // The single-port request still defined its one missing measurement.
    let log = log.lock().await;
    assert!(log.contains(&"CALC1:PAR:EXT 'S11',S11".to_string()));
    Ok(())
}

#[tokio::test]
async fn malformed_transfer_header_is_fatal() -> anyhow::Result<()> {
    let mut responses = HashMap::new();
    responses.insert("CALC1:PAR:CAT:EXT?".to_string(), canned(b"\"CH1_S11_1,S11\"\n"));
    responses.insert("*OPC?".to_string(), canned(b"1\n"));
    responses.insert("MMEM:TRAN? 'dut.s1p'".to_string(), canned(b"garbage\n"));

    let (driver, _log) = test_driver(responses);

    let dir = tempfile::tempdir()?;
    let request = SnpRequest::new("dut.s1p", "1").with_fetch_to(dir.path().join("dut.s1p"));

    let err = driver.save_snp(&request).await.unwrap_err();
    assert!(
        err.to_string().contains("does not start with '#'"),
        "unexpected error: {err:#}"
    );
    Ok(())
}
