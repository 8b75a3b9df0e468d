//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("GPU fabric benchmark"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("fabricbench"));
}

#[test]
fn test_run_subcommand_exists() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success();
}

#[test]
fn test_hosts_list_subcommand_exists() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .args(["hosts", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_script_prints_mpirun_invocation() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .args(["script", "--hostfile", "hosts/default"])
        .assert()
        .success()
        .stdout(predicates::str::contains("mpirun"))
        .stdout(predicates::str::contains("--hostfile hosts/default"));
}

#[test]
fn test_script_debug_flag_adds_debug_env() {
    Command::cargo_bin("fabricbench")
        .unwrap()
        .args(["script", "--debug"])
        .assert()
        .success()
        .stdout(predicates::str::contains("NCCL_DEBUG=WARN"));
}
