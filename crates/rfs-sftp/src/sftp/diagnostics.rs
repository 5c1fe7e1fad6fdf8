//! Pre-login reachability checks for an SSH endpoint.
//!
//! DNS, TCP connect and SSH identification banner, each reported as a step.
//! Built on `rfs_core::diagnostics`; nothing here authenticates.

use crate::sftp::error::{RemoteError, RemoteResult};
use crate::sftp::types::ConnectionIdentity;
use rfs_core::diagnostics::{self, DiagnosticReport, DiagnosticStep};
use std::time::{Duration, Instant};

/// Default per-probe timeout.
pub const DIAG_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn diagnose_endpoint(identity: &ConnectionIdentity, timeout: Duration) -> RemoteResult<DiagnosticReport> {
    let host = identity.host.clone();
    let port = identity.port;
    tokio::task::spawn_blocking(move || run_diagnostics(&host, port, timeout))
        .await
        .map_err(|e| RemoteError::unknown(format!("Diagnostic task panicked: {e}")))
}

fn run_diagnostics(host: &str, port: u16, timeout: Duration) -> DiagnosticReport {
    let run_start = Instant::now();
    let mut steps: Vec<DiagnosticStep> = Vec::new();

    let Some(addr) = diagnostics::probe_dns(host, port, &mut steps) else {
        return diagnostics::finish_report(host, port, "ssh", None, steps, run_start);
    };
    let resolved_ip = Some(addr.ip().to_string());

    let Some(stream) = diagnostics::probe_tcp(addr, timeout, &mut steps) else {
        return diagnostics::finish_report(host, port, "ssh", resolved_ip, steps, run_start);
    };

    diagnostics::probe_banner(&stream, timeout, "SSH-", &mut steps);
    diagnostics::finish_report(host, port, "ssh", resolved_ip, steps, run_start)
}
