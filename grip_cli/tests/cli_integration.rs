use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

// Short timings so a simulated cycle ends in about three seconds.
fn write_config(dir: &Path, timeout_ms: u64) -> PathBuf {
    let results = dir.join("results");
    let toml = format!(
        r#"
[device]
vendor_id = "0x1a86"
product_id = "0x7523"
poll_ms = 20

[timing]
timeout_ms = {timeout_ms}
baseline_settle_ms = 200
baseline_drop_ms = 100
sampling_delay_ms = 20
duration_ms = 1000

[outbound]
retry_delay_ms = 10

[storage]
results_dir = "{}"
"#,
        results.display().to_string().replace('\\', "/")
    );
    let path = dir.join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn grip(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("grip").unwrap();
    cmd.arg("--log-level").arg("warn").arg("--config").arg(cfg);
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("stdout line is JSON"))
        .collect()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["simulate", "--peak", "nope"], 2, "invalid value", "stderr")]
#[case(&["frobnicate"], 2, "unrecognized subcommand", "stderr")]
#[case(&["self-check"], 0, "OK:", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 3000);
    let assert = grip(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn simulate_emits_a_complete_cycle_and_persists_the_record() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 5000);
    let out = grip(&cfg).arg("simulate").assert().success();

    let lines = json_lines(&out.get_output().stdout);
    let messages: Vec<&str> = lines
        .iter()
        .map(|v| v["message"].as_str().expect("message field"))
        .collect();
    assert_eq!(messages.first(), Some(&"device_found"));
    assert!(messages.contains(&"baseline_ok"));
    assert!(messages.contains(&"measure_received"));
    assert_eq!(messages.last(), Some(&"measure_finish"));

    let finish = lines.last().unwrap();
    assert_eq!(finish["max"], 30.0);
    assert!(finish["avg"].as_f64().unwrap() <= 30.0);
    assert!(!finish["rawMeasures"].as_array().unwrap().is_empty());

    let records: Vec<_> = fs::read_dir(dir.path().join("results"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(records.len(), 1);
    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&records[0]).unwrap()).unwrap();
    assert_eq!(record["inputData"]["source"], "simulate");
    assert_eq!(record["outputData"]["weightMax"], 30.0);
    assert!(record["messages"].as_array().unwrap().is_empty());
}

#[test]
fn missing_coefficient_exits_with_its_taxonomy_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 5000);
    let out = grip(&cfg)
        .args(["simulate", "--no-coefficient"])
        .assert()
        .code(14)
        .stderr(predicate::str::contains("coefficient"));
    let lines = json_lines(&out.get_output().stdout);
    let last = lines.last().expect("error status");
    assert_eq!(last["message"], "error");
    assert_eq!(last["code"], 4);
}

#[test]
fn unplugged_device_times_out() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 150);
    grip(&cfg)
        .args(["simulate", "--unplugged"])
        .assert()
        .code(16)
        .stdout(predicate::str::contains(r#""message":"timeout""#))
        .stderr(predicate::str::contains("What happened"));
}

#[test]
fn json_mode_reports_errors_as_json() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 150);
    let out = grip(&cfg)
        .args(["--json", "simulate", "--unplugged"])
        .assert()
        .code(16);
    let stderr = String::from_utf8_lossy(&out.get_output().stderr).to_string();
    let last = stderr.lines().last().expect("error line");
    let v: serde_json::Value = serde_json::from_str(last).expect("json error");
    assert_eq!(v["reason"], "OverallTimeout");
    assert_eq!(v["code"], 6);
}

#[test]
fn bad_config_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[device]\nvendor_id = \"0x1a86\"\nproduct_id = \"0x7523\"\n[measure]\ntrigger = 5.0\nceil_weight = 1.0\n").unwrap();
    grip(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid"));
}

#[test]
fn missing_config_file_is_explained() {
    let dir = tempdir().unwrap();
    grip(&dir.path().join("absent.toml"))
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("could not be read"));
}

#[cfg(not(feature = "hardware"))]
#[test]
fn run_serves_stdin_commands_until_the_cycle_ends() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), 5000);
    let mut cmd = grip(&cfg);
    cmd.args(["run", "--cycles", "1", "--no-gauge"]);
    let out = assert_cmd::Command::from_std(cmd)
        .write_stdin(
            "{\"inputData\": {\"cmd\": \"appShow\"}}\n{\"inputData\": {\"cmd\": \"measureStart\"}}\n",
        )
        .assert()
        .success();
    let lines = json_lines(&out.get_output().stdout);
    assert_eq!(lines.first().unwrap()["message"], "app_show");
    assert_eq!(lines.last().unwrap()["message"], "measure_finish");
}
