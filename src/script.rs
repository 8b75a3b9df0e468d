//! Renders the mpirun invocation for a parameter set.
//!
//! Pure formatting: identical inputs always produce byte-identical text.
//! The same rendering feeds the dashboard's script preview and the server's
//! actual launch, so the preview is never out of sync with what runs.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::LauncherConfig;
use crate::params::BenchParams;

/// Indented backslash continuation used between clauses.
const CONT: &str = " \\\n    ";

/// Build the full benchmark command line.
///
/// Conditional clauses: the `NCCL_DEBUG` export appears only when debugging
/// is enabled; `-b`/`-e` only when the corresponding sweep bound is set;
/// `-n` only for a positive iteration count.
pub fn render_script(params: &BenchParams, hostfile: &Path, launcher: &LauncherConfig) -> String {
    let mut script = format!(
        "{mpirun}{c}--allow-run-as-root\
         {c}--hostfile {hostfile}\
         {c}--map-by {map_by}\
         {c}--mca oob_tcp_if_include {oob}\
         {c}--mca pml ^ucx\
         {c}--mca btl self,tcp\
         {c}--mca btl_tcp_if_include {data}\
         {c}--mca routed direct\
         {c}--mca plm_rsh_no_tree_spawn 1\
         {c}-x UCX_TLS=tcp",
        mpirun = launcher.mpirun,
        c = CONT,
        hostfile = hostfile.display(),
        map_by = params.map_by,
        oob = params.oob_interface,
        data = params.data_interface,
    );

    if params.enable_debug {
        let _ = write!(script, "{CONT}-x NCCL_DEBUG={}", params.debug_level);
    }

    let _ = write!(
        script,
        "{c}-x NCCL_IB_GID_INDEX={gid}\
         {c}-x NCCL_MIN_NCHANNELS={channels}\
         {c}-x NCCL_IB_QPS_PER_CONNECTION={qps}\
         {c}{binary}",
        c = CONT,
        gid = params.ib_gid_index,
        channels = params.min_channels,
        qps = params.qps_per_connection,
        binary = launcher.bench_binary,
    );

    if let Some(begin) = params.size_begin {
        let _ = write!(script, " -b {begin}");
    }
    if let Some(end) = params.size_end {
        let _ = write!(script, " -e {end}");
    }
    if let Some(iters) = params.iters.filter(|n| *n > 0) {
        let _ = write!(script, " -n {iters}");
    }

    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{DebugLevel, SizeSpec, SizeUnit};

    fn launcher() -> LauncherConfig {
        LauncherConfig::default()
    }

    fn base_params() -> BenchParams {
        BenchParams {
            hostlist: Some("default".to_string()),
            ..BenchParams::default()
        }
    }

    #[test]
    fn render_is_deterministic() {
        let params = base_params();
        let hostfile = Path::new("data/hosts/default");
        let a = render_script(&params, hostfile, &launcher());
        let b = render_script(&params, hostfile, &launcher());
        assert_eq!(a, b);
    }

    #[test]
    fn includes_fixed_mca_stanza() {
        let script = render_script(&base_params(), Path::new("hosts"), &launcher());
        assert!(script.starts_with("/opt/hpc/bin/mpirun \\\n"));
        assert!(script.contains("--mca pml ^ucx"));
        assert!(script.contains("--mca btl_tcp_if_include bond0"));
        assert!(script.contains("-x NCCL_MIN_NCHANNELS=32"));
    }

    #[test]
    fn debug_clause_only_when_enabled() {
        let mut params = base_params();
        let script = render_script(&params, Path::new("hosts"), &launcher());
        assert!(!script.contains("NCCL_DEBUG"));

        params.enable_debug = true;
        params.debug_level = DebugLevel::Trace;
        let script = render_script(&params, Path::new("hosts"), &launcher());
        assert!(script.contains("-x NCCL_DEBUG=TRACE"));
    }

    #[test]
    fn size_flags_only_when_bounds_set() {
        let mut params = base_params();
        params.size_begin = None;
        params.size_end = None;
        let script = render_script(&params, Path::new("hosts"), &launcher());
        assert!(!script.contains(" -b "));
        assert!(!script.contains(" -e "));

        params.size_begin = Some(SizeSpec::new(8, SizeUnit::Kibi));
        params.size_end = Some(SizeSpec::new(1, SizeUnit::Gibi));
        let script = render_script(&params, Path::new("hosts"), &launcher());
        assert!(script.ends_with(" -b 8K -e 1G -n 20"));
    }

    #[test]
    fn iteration_flag_skipped_for_zero() {
        let mut params = base_params();
        params.iters = Some(0);
        let script = render_script(&params, Path::new("hosts"), &launcher());
        assert!(!script.contains(" -n "));
    }
}
