//! Reachability probes for remote endpoints.
//!
//! Each probe appends one [`DiagnosticStep`] to the caller's step list and
//! returns whatever the next probe needs (an address, a stream, a banner).
//! [`finish_report`] folds the steps into a [`DiagnosticReport`].

use log::debug;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

/// Result of a single probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

impl DiagnosticStep {
    fn new(name: &str, status: StepStatus, message: impl Into<String>, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration_ms: started.elapsed().as_millis() as u64,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub resolved_ip: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    pub reachable: bool,
    pub total_duration_ms: u64,
}

// ─── Probes ─────────────────────────────────────────────────────────────────

/// Resolve `host:port` and return the first address.
pub fn probe_dns(host: &str, port: u16, steps: &mut Vec<DiagnosticStep>) -> Option<SocketAddr> {
    let t = Instant::now();
    let resolved = (host, port).to_socket_addrs();
    match resolved {
        Ok(addrs) => {
            let all: Vec<SocketAddr> = addrs.collect();
            match all.first() {
                Some(first) => {
                    let mut step = DiagnosticStep::new(
                        "DNS Resolution",
                        StepStatus::Pass,
                        format!("{host} → {}", first.ip()),
                        t,
                    );
                    if all.len() > 1 {
                        let ips: Vec<String> = all.iter().map(|a| a.ip().to_string()).collect();
                        step = step.with_detail(format!("All resolved addresses: {}", ips.join(", ")));
                    }
                    steps.push(step);
                    Some(*first)
                }
                None => {
                    steps.push(
                        DiagnosticStep::new(
                            "DNS Resolution",
                            StepStatus::Fail,
                            format!("DNS returned no addresses for {host}"),
                            t,
                        )
                        .with_detail("Verify the hostname is correct"),
                    );
                    None
                }
            }
        }
        Err(e) => {
            steps.push(
                DiagnosticStep::new(
                    "DNS Resolution",
                    StepStatus::Fail,
                    format!("DNS lookup failed: {e}"),
                    t,
                )
                .with_detail("Check hostname spelling and network connectivity"),
            );
            None
        }
    }
}

/// Open a TCP connection within `timeout`.
pub fn probe_tcp(
    addr: SocketAddr,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<TcpStream> {
    let t = Instant::now();
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            steps.push(DiagnosticStep::new(
                "TCP Connect",
                StepStatus::Pass,
                format!("Connected to {addr} in {}ms", t.elapsed().as_millis()),
                t,
            ));
            Some(stream)
        }
        Err(e) => {
            let hint = match e.kind() {
                std::io::ErrorKind::TimedOut => {
                    "Connection timed out, the port may be firewalled or the host unreachable"
                }
                std::io::ErrorKind::ConnectionRefused => {
                    "Connection refused, no service is listening on this port"
                }
                _ => "Check firewall rules and that the service is running",
            };
            steps.push(
                DiagnosticStep::new("TCP Connect", StepStatus::Fail, format!("TCP connect failed: {e}"), t)
                    .with_detail(hint),
            );
            None
        }
    }
}

/// Read the greeting line a server sends right after connect and check that it
/// starts with `expected_prefix` (e.g. `"SSH-"`).
pub fn probe_banner(
    stream: &TcpStream,
    timeout: Duration,
    expected_prefix: &str,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<String> {
    let _ = stream.set_read_timeout(Some(timeout));
    let t = Instant::now();
    let mut buf = [0u8; 512];
    match Read::read(&mut &*stream, &mut buf) {
        Ok(0) => {
            steps.push(DiagnosticStep::new(
                "Banner",
                StepStatus::Fail,
                "Server closed the connection without a greeting",
                t,
            ));
            None
        }
        Ok(n) => {
            let banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            debug!("probe banner: {}", banner);
            let status = if banner.starts_with(expected_prefix) {
                StepStatus::Pass
            } else {
                StepStatus::Warn
            };
            let mut step = DiagnosticStep::new(
                "Banner",
                status,
                format!("Banner: {}", banner.chars().take(120).collect::<String>()),
                t,
            );
            if status == StepStatus::Warn {
                step = step.with_detail(format!(
                    "Expected a greeting starting with '{expected_prefix}', is this the right port?"
                ));
            }
            steps.push(step);
            Some(banner)
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            steps.push(DiagnosticStep::new(
                "Banner",
                StepStatus::Warn,
                "No greeting received within timeout",
                t,
            ));
            None
        }
        Err(e) => {
            steps.push(DiagnosticStep::new(
                "Banner",
                StepStatus::Fail,
                format!("Banner read error: {e}"),
                t,
            ));
            None
        }
    }
}

/// Fold accumulated steps into a report.
pub fn finish_report(
    host: &str,
    port: u16,
    protocol: &str,
    resolved_ip: Option<String>,
    steps: Vec<DiagnosticStep>,
    start: Instant,
) -> DiagnosticReport {
    let first_fail = steps.iter().find(|s| s.status == StepStatus::Fail);
    let any_warn = steps.iter().any(|s| s.status == StepStatus::Warn);

    let summary = match first_fail {
        Some(fail) => format!("Diagnostics stopped at {}: {}", fail.name, fail.message),
        None if any_warn => "Endpoint reachable but warnings were reported".to_string(),
        None => "All probes passed".to_string(),
    };

    DiagnosticReport {
        host: host.to_string(),
        port,
        protocol: protocol.to_string(),
        resolved_ip,
        reachable: first_fail.is_none(),
        steps,
        summary,
        total_duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn step(name: &str, status: StepStatus) -> DiagnosticStep {
        DiagnosticStep {
            name: name.into(),
            status,
            message: "msg".into(),
            duration_ms: 0,
            detail: None,
        }
    }

    #[test]
    fn step_serializes_camel_case_and_lowercase_status() {
        let json = serde_json::to_string(&step("DNS Resolution", StepStatus::Pass)).unwrap();
        assert!(json.contains("\"durationMs\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn probe_dns_resolves_loopback() {
        let mut steps = Vec::new();
        let addr = probe_dns("127.0.0.1", 22, &mut steps);
        assert_eq!(addr.map(|a| a.port()), Some(22));
        assert_eq!(steps[0].status, StepStatus::Pass);
    }

    #[test]
    fn probe_dns_fails_for_invalid_host() {
        let mut steps = Vec::new();
        assert!(probe_dns("this.host.does.not.exist.invalid", 22, &mut steps).is_none());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Fail);
    }

    #[test]
    fn probe_tcp_fails_on_closed_port() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let mut steps = Vec::new();
        assert!(probe_tcp(addr, Duration::from_millis(300), &mut steps).is_none());
        assert_eq!(steps[0].status, StepStatus::Fail);
        assert!(steps[0].detail.is_some());
    }

    #[test]
    fn probe_banner_accepts_ssh_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").unwrap();
        });

        let mut steps = Vec::new();
        let stream = probe_tcp(addr, Duration::from_secs(2), &mut steps).unwrap();
        let banner = probe_banner(&stream, Duration::from_secs(2), "SSH-", &mut steps);
        server.join().unwrap();

        assert_eq!(banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
        assert_eq!(steps[1].status, StepStatus::Pass);
    }

    #[test]
    fn probe_banner_warns_on_foreign_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"220 ftp ready\r\n").unwrap();
        });

        let mut steps = Vec::new();
        let stream = probe_tcp(addr, Duration::from_secs(2), &mut steps).unwrap();
        probe_banner(&stream, Duration::from_secs(2), "SSH-", &mut steps);
        server.join().unwrap();

        assert_eq!(steps[1].status, StepStatus::Warn);
        assert!(steps[1].detail.as_deref().unwrap().contains("SSH-"));
    }

    #[test]
    fn finish_report_all_pass() {
        let steps = vec![step("A", StepStatus::Pass), step("B", StepStatus::Info)];
        let report = finish_report("h", 22, "SSH", Some("1.2.3.4".into()), steps, Instant::now());
        assert!(report.reachable);
        assert_eq!(report.summary, "All probes passed");
    }

    #[test]
    fn finish_report_names_first_failure() {
        let steps = vec![step("DNS", StepStatus::Pass), step("TCP", StepStatus::Fail)];
        let report = finish_report("h", 22, "SSH", None, steps, Instant::now());
        assert!(!report.reachable);
        assert!(report.summary.contains("TCP"));
    }

    #[test]
    fn finish_report_with_warning_only() {
        let report = finish_report("h", 22, "SSH", None, vec![step("Banner", StepStatus::Warn)], Instant::now());
        assert!(report.reachable);
        assert!(report.summary.contains("warnings"));
    }
}
