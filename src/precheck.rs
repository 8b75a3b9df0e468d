//! Node occupancy precheck: SSH fan-out counting GPU compute processes.
//!
//! A run is refused while any target node still hosts a compute process,
//! so the precheck asks every node over SSH before mpirun is ever invoked.
//! Unreachable nodes are reported separately; they do not count as busy.

use futures::{stream, StreamExt};
use tokio::process::Command;
use tracing::debug;

use crate::run::{BusyNode, PrecheckReport};

/// Upper bound on simultaneous SSH sessions.
const MAX_CONCURRENCY: usize = 64;

const SSH_CONNECT_TIMEOUT_SECS: u32 = 5;

/// Counts compute processes on the node; one pid per line, so `wc -l` is
/// the process count.
const GPU_PROCESS_QUERY: &str =
    "nvidia-smi --query-compute-apps=pid --format=csv,noheader | wc -l";

/// Check every host in parallel (bounded), preserving input order.
pub async fn precheck_hosts(hosts: &[String]) -> PrecheckReport {
    let statuses: Vec<BusyNode> = stream::iter(hosts.iter().cloned().map(check_node))
        .buffered(MAX_CONCURRENCY)
        .collect()
        .await;

    let mut report = PrecheckReport {
        total_nodes: hosts.len() as u32,
        ..PrecheckReport::default()
    };
    for status in statuses {
        if status.error.is_some() {
            report.error_nodes.push(status);
        } else if status.process_count > 0 {
            report.busy_nodes.push(status);
        }
    }
    report.busy_count = report.busy_nodes.len() as u32;
    report.error_count = report.error_nodes.len() as u32;
    report
}

async fn check_node(ip: String) -> BusyNode {
    debug!(%ip, "checking node occupancy");
    let output = Command::new("ssh")
        .args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            &format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"),
            &ip,
            GPU_PROCESS_QUERY,
        ])
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return BusyNode {
                ip,
                process_count: 0,
                error: Some(format!("ssh failed: {}", stderr.trim())),
            };
        }
        Err(err) => {
            return BusyNode {
                ip,
                process_count: 0,
                error: Some(format!("ssh failed: {err}")),
            };
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.trim().parse::<u32>() {
        Ok(process_count) => BusyNode {
            ip,
            process_count,
            error: None,
        },
        Err(_) => BusyNode {
            ip,
            process_count: 0,
            error: Some(format!(
                "unexpected process count output: {:?}",
                stdout.trim()
            )),
        },
    }
}
