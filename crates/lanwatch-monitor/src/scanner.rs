//! arp-scan process wrapper.
//!
//! Runs the scanner as a child process via `tokio::process::Command`, races
//! it against a hard deadline and parses its plain-text output.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use uuid::Uuid;

use lanwatch_core::DiscoveredDevice;

use crate::error::{MonitorError, Result};
use crate::scan_output;

/// Result of a single scanner execution.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Unique ID for this scan, used to correlate log lines.
    pub scan_id: Uuid,
    pub devices: Vec<DiscoveredDevice>,
    /// Output lines that were not a valid `ip mac` pair.
    pub rejected_lines: usize,
    /// Wall-clock duration of the scan.
    pub duration: Duration,
}

/// Something that can discover devices on an interface/subnet pair.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Scan `subnet` through `interface`, giving the tool `budget` to finish.
    async fn scan(&self, interface: &str, subnet: &str, budget: Duration) -> Result<ScanResult>;
}

/// Hands out a fresh scanner per run, so concurrent jobs never contend for
/// one adapter.
pub trait ScannerFactory: Send + Sync {
    fn create(&self) -> Box<dyn DeviceScanner>;
}

/// Wrapper around the arp-scan binary.
///
/// One instance runs at most one scan at a time; a concurrent call fails
/// with [`MonitorError::ScanInProgress`].
pub struct ArpScanner {
    scanner_path: String,
    grace: Duration,
    busy: AtomicBool,
}

/// Clears the busy flag when a scan finishes, however it finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ArpScanner {
    pub fn new(scanner_path: &str, grace: Duration) -> Self {
        Self {
            scanner_path: scanner_path.to_string(),
            grace,
            busy: AtomicBool::new(false),
        }
    }

    /// Verify the scanner is installed and report its version banner.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.scanner_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        // arp-scan prints its version banner on stderr.
        let mut banner = String::from_utf8_lossy(&output.stdout).to_string();
        if banner.trim().is_empty() {
            banner = String::from_utf8_lossy(&output.stderr).to_string();
        }
        Ok(banner.trim().to_string())
    }

    /// Arguments for one scan: interface, tab-separated `ip mac` output
    /// without banners, then the target.
    pub fn scan_args(interface: &str, subnet: &str) -> Vec<String> {
        vec![
            format!("--interface={interface}"),
            "--plain".to_string(),
            "--format=${ip}\t${mac}".to_string(),
            subnet.to_string(),
        ]
    }

    fn spawn_error(&self, err: std::io::Error) -> MonitorError {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => MonitorError::ScannerNotFound {
                path: format!("{}: {err}", self.scanner_path),
            },
            _ => MonitorError::Io(err),
        }
    }
}

#[async_trait]
impl DeviceScanner for ArpScanner {
    async fn scan(&self, interface: &str, subnet: &str, budget: Duration) -> Result<ScanResult> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::ScanInProgress);
        }
        let _busy = BusyGuard(&self.busy);

        let scan_id = Uuid::new_v4();
        let deadline = budget.saturating_add(self.grace);
        let start = Instant::now();

        tracing::info!(
            scan_id = %scan_id,
            interface = %interface,
            subnet = %subnet,
            deadline_secs = deadline.as_secs(),
            "Starting arp-scan"
        );

        let mut child = Command::new(&self.scanner_path)
            .args(Self::scan_args(interface, subnet))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::Other, "scanner stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::Other, "scanner stderr not captured"))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let waited = tokio::time::timeout(deadline, async {
            let (read_out, read_err, status) = tokio::join!(
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait()
            );
            read_out?;
            read_err?;
            Ok::<ExitStatus, std::io::Error>(status?)
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                // Kill and reap so no zombie outlives the call.
                if let Err(e) = child.kill().await {
                    tracing::warn!(scan_id = %scan_id, error = %e, "Failed to kill timed out scanner");
                }
                tracing::warn!(
                    scan_id = %scan_id,
                    subnet = %subnet,
                    deadline_secs = deadline.as_secs(),
                    "arp-scan timed out"
                );
                return Err(MonitorError::ScanTimeout {
                    secs: deadline.as_secs(),
                });
            }
        };

        let duration = start.elapsed();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&err).trim().to_string();
            return Err(MonitorError::ScanProcessFailed {
                code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        let parsed = scan_output::parse_scan_output(&String::from_utf8_lossy(&out));

        tracing::info!(
            scan_id = %scan_id,
            subnet = %subnet,
            devices = parsed.devices.len(),
            rejected_lines = parsed.rejected_lines,
            duration_ms = duration.as_millis(),
            "arp-scan complete"
        );

        Ok(ScanResult {
            scan_id,
            devices: parsed.devices,
            rejected_lines: parsed.rejected_lines,
            duration,
        })
    }
}

/// Builds one [`ArpScanner`] per run from shared settings.
#[derive(Debug, Clone)]
pub struct ArpScannerFactory {
    pub scanner_path: String,
    pub grace: Duration,
}

impl ArpScannerFactory {
    pub fn new(scanner_path: &str, grace: Duration) -> Self {
        Self {
            scanner_path: scanner_path.to_string(),
            grace,
        }
    }
}

impl ScannerFactory for ArpScannerFactory {
    fn create(&self) -> Box<dyn DeviceScanner> {
        Box::new(ArpScanner::new(&self.scanner_path, self.grace))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;

    /// Write an executable shell script standing in for arp-scan.
    fn fake_scanner(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("arp-scan");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn scanner_at(path: &std::path::Path, grace: Duration) -> ArpScanner {
        ArpScanner::new(path.to_str().unwrap(), grace)
    }

    #[test]
    fn test_scan_args() {
        let args = ArpScanner::scan_args("eth0", "192.168.1.0/24");
        assert_eq!(
            args,
            vec![
                "--interface=eth0",
                "--plain",
                "--format=${ip}\t${mac}",
                "192.168.1.0/24"
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(
            &dir,
            r"printf '192.168.1.1\tAA:BB:CC:DD:EE:01\n'
printf 'not a device line\n'
printf '192.168.1.2\taa:bb:cc:dd:ee:02\n'",
        );

        let result = scanner_at(&path, Duration::from_secs(5))
            .scan("eth0", "192.168.1.0/24", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.devices.len(), 2);
        assert_eq!(result.devices[0].mac.to_string(), "aa:bb:cc:dd:ee:01");
        assert_eq!(result.rejected_lines, 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(&dir, "echo 'permission denied' >&2\nexit 2");

        let err = scanner_at(&path, Duration::from_secs(5))
            .scan("eth0", "10.0.0.0/24", Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            MonitorError::ScanProcessFailed { code, stderr } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "permission denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(&dir, "exec sleep 30");

        let start = Instant::now();
        let err = scanner_at(&path, Duration::from_millis(100))
            .scan("eth0", "10.0.0.0/24", Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::ScanTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unbounded_budget_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(&dir, r"printf '10.0.0.1\taa:bb:cc:dd:ee:01\n'");

        let result = scanner_at(&path, Duration::from_secs(30))
            .scan("eth0", "10.0.0.0/24", Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(result.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let scanner = ArpScanner::new("/nonexistent/arp-scan", Duration::from_secs(1));
        let err = scanner
            .scan("eth0", "10.0.0.0/24", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::ScannerNotFound { .. }));
        assert!(matches!(
            scanner.verify_installation().await,
            Err(MonitorError::ScannerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_scan_on_same_adapter_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(&dir, "sleep 1");
        let scanner = Arc::new(scanner_at(&path, Duration::from_secs(5)));

        let first = {
            let scanner = scanner.clone();
            tokio::spawn(async move {
                scanner
                    .scan("eth0", "10.0.0.0/24", Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = scanner
            .scan("eth0", "10.0.0.0/24", Duration::from_secs(5))
            .await;
        assert!(matches!(second, Err(MonitorError::ScanInProgress)));

        let first = first.await.unwrap().unwrap();
        assert!(first.devices.is_empty());

        // The flag is released once the first scan returns.
        scanner
            .scan("eth0", "10.0.0.0/24", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_installation() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_scanner(&dir, "echo 'arp-scan 1.10.0' >&2");
        let version = scanner_at(&path, Duration::from_secs(1))
            .verify_installation()
            .await
            .unwrap();
        assert_eq!(version, "arp-scan 1.10.0");
    }
}
