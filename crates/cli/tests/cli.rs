use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::json;
use tempfile::TempDir;

fn slotclaim_binary() -> PathBuf {
	let mut path = std::env::current_exe().expect("current_exe should resolve");
	path.pop();
	path.pop();
	path.push("slotclaim");
	path
}

fn command(workdir: &Path, args: &[&str]) -> Command {
	let mut cmd = Command::new(slotclaim_binary());
	cmd.current_dir(workdir)
		.args(args)
		.env("NO_COLOR", "1")
		.env_remove("RUST_LOG")
		.env_remove("SLOTCLAIM_USERNAME")
		.env_remove("SLOTCLAIM_PASSWORD");
	cmd
}

fn run(workdir: &Path, args: &[&str]) -> (bool, String, String) {
	let output = command(workdir, args).output().expect("failed to execute slotclaim");
	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	(output.status.success(), stdout, stderr)
}

/// A config with one slot per weekday so any computed date resolves.
fn write_config(dir: &Path) {
	let days = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];
	let court_a: serde_json::Map<String, serde_json::Value> = days.iter().map(|d| (d.to_string(), json!({ "06:00-07:00": "4411" }))).collect();
	let court_b: serde_json::Map<String, serde_json::Value> = days.iter().map(|d| (d.to_string(), json!({ "06:00-07:00": "5211" }))).collect();
	let config = json!({
		"schedule": { "courtA": court_a, "courtB": court_b },
		"resources": [
			{ "id": "courtA", "window": "06:00-07:00" },
			{ "id": "courtB", "window": "06:00-07:00" }
		],
		"unlock": { "time": "00:00", "timezone": "America/Mexico_City", "leadDays": 8 },
		"timing": {
			"pollIntervalMs": 20,
			"maxUnlockWaitSecs": 5,
			"navigationTimeoutMs": 2000,
			"selectorTimeoutMs": 1000,
			"resultTimeoutMs": 2000,
			"staggerMs": 5
		}
	});
	std::fs::write(dir.join("slotclaim.json"), serde_json::to_string_pretty(&config).unwrap()).expect("config should be written");
}

#[test]
fn classify_reads_arguments() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, stdout, stderr) = run(tmp.path(), &["classify", "El", "cupo", "está", "lleno."]);
	assert!(success, "classify failed: {stderr}");
	assert!(stdout.starts_with("SLOT_TAKEN:"), "{stdout}");
}

#[test]
fn classify_reads_stdin_as_json() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let mut child = command(tmp.path(), &["-f", "json", "classify"])
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.spawn()
		.expect("failed to spawn slotclaim");
	child
		.stdin
		.take()
		.expect("stdin should be piped")
		.write_all("Su reservación se ha realizado con éxito.".as_bytes())
		.expect("stdin write should succeed");
	let output = child.wait_with_output().expect("slotclaim should exit");
	assert!(output.status.success());

	let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
	assert_eq!(parsed["status"], "SUCCESS");
}

#[test]
fn resolve_prints_slot_or_lists_windows() {
	let tmp = TempDir::new().expect("temp dir should be created");
	write_config(tmp.path());

	let (success, stdout, stderr) = run(tmp.path(), &["resolve", "courtA", "2026-10-21", "06:00-07:00"]);
	assert!(success, "resolve failed: {stderr}");
	assert_eq!(stdout.trim(), "4411");

	let (success, _, stderr) = run(tmp.path(), &["resolve", "courtA", "2026-10-21", "09:00-10:00"]);
	assert!(!success);
	assert!(stderr.contains("06:00-07:00"), "valid windows missing: {stderr}");
}

#[test]
fn run_requires_credentials() {
	let tmp = TempDir::new().expect("temp dir should be created");
	write_config(tmp.path());

	let (success, stdout, stderr) = run(tmp.path(), &["run", "--shadow"]);
	assert!(!success);
	assert!(stdout.is_empty());
	assert!(stderr.contains("SLOTCLAIM_USERNAME"), "{stderr}");
}

#[test]
fn run_rejects_broken_config() {
	let tmp = TempDir::new().expect("temp dir should be created");
	std::fs::write(tmp.path().join("slotclaim.json"), "{ \"resources\": 3 }").expect("config should be written");

	let (success, _, stderr) = run(tmp.path(), &["run", "--fake", "--shadow"]);
	assert!(!success);
	assert!(stderr.contains("slotclaim.json"), "{stderr}");
}

#[test]
fn shadow_rehearsal_reports_every_resource() {
	let tmp = TempDir::new().expect("temp dir should be created");
	write_config(tmp.path());

	let (success, stdout, stderr) = run(tmp.path(), &["-f", "json", "run", "--fake", "--shadow", "--no-skew", "--skip", "courtB"]);
	assert!(success, "run failed: {stderr}");
	let report: serde_json::Value = serde_json::from_str(&stdout).expect("report should be JSON");
	assert_eq!(report["shadow"], true);
	assert_eq!(report["dryRun"], true);
	let entries = report["entries"].as_array().expect("entries should be an array");
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0]["resource"], "courtA");
	assert_eq!(entries[0]["status"], "DRY_RUN");
	assert_eq!(entries[0]["slotId"], "4411");
}

#[test]
fn skipping_everything_is_a_quiet_success() {
	let tmp = TempDir::new().expect("temp dir should be created");
	write_config(tmp.path());

	let (success, stdout, stderr) = run(tmp.path(), &["run", "--fake", "--skip", "courtA", "--skip", "courtB"]);
	assert!(success, "run failed: {stderr}");
	assert!(stdout.is_empty());
}
