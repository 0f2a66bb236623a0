//! Connectivity pre-check for bench devices.

use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: String,
    pub reachable: bool,
}

/// Extract host:port from a bare address or a URL.
///
/// Handles `http://`, `https://`, `tcp://` and `telnet://`; strips any path.
pub fn extract_host(url: &str) -> &str {
    let stripped = url
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_start_matches("tcp://")
        .trim_start_matches("telnet://");
    stripped.split('/').next().unwrap_or("")
}

/// Attempt a TCP connection to `target` with a timeout. Any resolved
/// address accepting the connection counts.
pub fn check_tcp_reachable(target: &str, timeout: Duration) -> bool {
    let host = extract_host(target);
    if host.is_empty() {
        return false;
    }
    let addrs = match host.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!(host, error = %e, "address did not resolve");
            return false;
        }
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

/// Probe every host in parallel and report each one.
pub fn probe_all(hosts: &[String], timeout: Duration) -> Vec<ProbeResult> {
    let results: Vec<ProbeResult> = thread::scope(|s| {
        let handles: Vec<_> = hosts
            .iter()
            .map(|host| s.spawn(move || check_tcp_reachable(host, timeout)))
            .collect();
        hosts
            .iter()
            .zip(handles)
            .map(|(host, h)| ProbeResult {
                host: host.clone(),
                reachable: h.join().unwrap_or(false),
            })
            .collect()
    });

    for r in &results {
        if r.reachable {
            tracing::info!(host = %r.host, "reachable");
        } else {
            tracing::error!(host = %r.host, "unreachable");
        }
    }
    results
}
