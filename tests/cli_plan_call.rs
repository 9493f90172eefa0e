use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "collplan-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn run_plan_call(args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_plan_call"))
        .args(args)
        .output()
        .expect("run plan_call");
    assert!(
        output.status.success(),
        "plan_call failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn plan_line(stdout: &str) -> &str {
    stdout
        .lines()
        .find(|line| line.starts_with("plan "))
        .expect("missing plan line")
}

#[test]
fn plan_call_json_counts_cover_the_call() {
    let dir = unique_temp_dir("plan-json");
    let out_json = dir.join("plan.json");
    let stdout = run_plan_call(&[
        "--comm-size",
        "8",
        "--box-size",
        "4",
        "--rank",
        "5",
        "--op",
        "all_reduce",
        "--count",
        "1000000",
        "--json",
        out_json.to_str().unwrap(),
    ]);
    assert!(plan_line(&stdout).contains("boxes=2"));

    let raw = fs::read_to_string(&out_json).expect("read plan.json");
    let v: Value = serde_json::from_str(&raw).expect("parse plan.json");
    let ctx = v.get("context").expect("context");
    let slices = ctx["slice_iterations"].as_u64().unwrap();
    let regular = ctx["counts"]["slice_total"].as_u64().unwrap();
    let last = ctx["last"]["slice_total"].as_u64().unwrap();
    assert!(slices > 1);
    assert_eq!(regular * (slices - 1) + last, 1_000_000);

    let legs = v["legs"].as_array().expect("legs array");
    let leg_lines = stdout.lines().filter(|l| l.starts_with("leg ")).count();
    assert_eq!(legs.len(), leg_lines);
    assert!(
        legs.iter()
            .any(|leg| leg["fabric"].as_str() == Some("scale_out")),
        "a two-box all-reduce must cross boxes"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn plan_call_downgrades_small_broadcast() {
    let stdout = run_plan_call(&[
        "--comm-size",
        "8",
        "--box-size",
        "8",
        "--op",
        "bcast",
        "--count",
        "16",
        "--root",
        "0",
        "--quiet",
    ]);
    let line = plan_line(&stdout);
    assert!(line.contains("op=Broadcast"), "{line}");
    assert!(line.contains("resolved=SimpleBroadcast"), "{line}");
    assert_eq!(stdout.lines().filter(|l| l.starts_with("leg ")).count(), 0);
}

#[test]
fn plan_call_rejects_bad_box_size() {
    let output = Command::new(env!("CARGO_BIN_EXE_plan_call"))
        .args(["--comm-size", "8", "--box-size", "3"])
        .output()
        .expect("run plan_call");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid box size"));
}
