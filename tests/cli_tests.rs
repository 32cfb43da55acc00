mod common;
use common::*;

use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

#[test]
fn test_text_input_produces_ndjson() {
    let input = "user 1 logged in\nuser 2 logged in\nuser 3 logged out\n";
    let (stdout, stderr, exit_code) = run_drainflow_with_input(&["-p", "1"], input);
    assert_eq!(exit_code, 0, "drainflow should exit successfully: {}", stderr);

    let records = parse_records(&stdout);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["message"], "user 1 logged in");
    assert_eq!(records[1]["template"], "user <*> logged in");
    assert_eq!(records[1]["params"][0], "2");
    assert_eq!(
        records[0]["template_id"].as_str().map(str::len),
        Some(16),
        "template ids render as 16 hex digits"
    );
}

#[test]
fn test_json_input_with_message_field() {
    let input = r#"{"msg": "disk 91 percent full", "host": "a"}
{"msg": "disk 40 percent full", "host": "b"}
{"level": "info"}"#;
    let (stdout, stderr, exit_code) =
        run_drainflow_with_input(&["-f", "json", "--message-field", "msg", "--stats"], input);
    assert_eq!(exit_code, 0, "bad lines must not fail the run: {}", stderr);

    let records = parse_records(&stdout);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["host"], "b");
    assert!(stderr.contains("Lines processed: 3 total, 2 output, 1 dropped"));
    assert!(stderr.contains("missing_field"));
}

#[test]
fn test_stdout_carries_only_records() {
    let (stdout, _stderr, exit_code) =
        run_drainflow_with_input(&["--log-level", "debug", "--stats", "--templates"], "a b c\n");
    assert_eq!(exit_code, 0);
    assert_eq!(parse_records(&stdout).len(), 1);
}

#[test]
fn test_templates_report() {
    let input = "job 1 done\njob 2 done\njob 3 done\ncache cleared\n";
    let (_stdout, stderr, exit_code) = run_drainflow_with_input(&["--templates"], input);
    assert_eq!(exit_code, 0);
    assert!(stderr.contains("templates (2 items):"));

    let job = stderr.find("job <*> done").expect("generalised template listed");
    let cache = stderr.find("cache cleared").expect("single template listed");
    assert!(job < cache, "templates are ranked by count");
}

#[test]
fn test_output_file_and_state_file() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("records.ndjson");
    let state = dir.path().join("state.json");
    let out_arg = out.to_str().unwrap();
    let state_arg = state.to_str().unwrap();

    let (stdout, stderr, exit_code) = run_drainflow_with_input(
        &["-p", "1", "-o", out_arg, "--state", state_arg],
        "worker 7 started\nworker 8 started\n",
    );
    assert_eq!(exit_code, 0, "{}", stderr);
    assert!(stdout.is_empty());
    assert_eq!(parse_records(&fs::read_to_string(&out).unwrap()).len(), 2);

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(saved["format_version"], 1);
    assert_eq!(saved["templates"][0]["count"], 2);

    // A second run starts from the saved model
    let (_stdout, _stderr, exit_code) = run_drainflow_with_input(
        &["-p", "1", "-o", out_arg, "--state", state_arg],
        "worker 9 started\n",
    );
    assert_eq!(exit_code, 0);
    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(saved["templates"].as_array().unwrap().len(), 1);
    assert_eq!(saved["templates"][0]["count"], 3);
}

#[test]
fn test_reads_files_and_gzip() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("a.log");
    let gz = dir.path().join("b.log.gz");
    fs::write(&plain, "alpha one\nalpha two").unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"beta one\nbeta two\n").unwrap();
    fs::write(&gz, encoder.finish().unwrap()).unwrap();

    let (stdout, stderr, exit_code) = run_drainflow_with_input(
        &["-p", "1", plain.to_str().unwrap(), gz.to_str().unwrap()],
        "",
    );
    assert_eq!(exit_code, 0, "{}", stderr);

    let messages: Vec<String> = parse_records(&stdout)
        .iter()
        .map(|record| record["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages, vec!["alpha one", "alpha two", "beta one", "beta two"]);
}

#[test]
fn test_dash_reads_stdin() {
    let (stdout, _stderr, exit_code) =
        run_drainflow_with_input(&["-"], "from stdin\n");
    assert_eq!(exit_code, 0);
    assert_eq!(parse_records(&stdout)[0]["message"], "from stdin");
}

#[test]
fn test_file_argument() {
    let (stdout, _stderr, exit_code) = run_drainflow_with_file(&["-p", "2"], "x 1\nx 2\nx 3\n");
    assert_eq!(exit_code, 0);
    assert_eq!(parse_records(&stdout).len(), 3);
}

#[test]
fn test_missing_input_file_fails() {
    let (_stdout, stderr, exit_code) =
        run_drainflow_with_input(&["/no/such/input.log"], "");
    assert_eq!(exit_code, 1);
    assert!(stderr.contains("/no/such/input.log"));
}

#[test]
fn test_invalid_settings_are_usage_errors() {
    for args in [
        &["-p", "0"][..],
        &["--batch-size", "0"],
        &["--sync-period", "2s", "--sync-jitter", "3s"],
        &["--message-field", ""],
        &["--flush-after", "later"],
        &["-f", "xml"],
    ] {
        let (_stdout, _stderr, exit_code) = run_drainflow_with_input(args, "");
        assert_eq!(exit_code, 2, "expected usage error for {:?}", args);
    }
}

#[test]
fn test_unreadable_state_file_fails() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    fs::write(&state, "{ definitely not json").unwrap();

    let (_stdout, stderr, exit_code) =
        run_drainflow_with_input(&["--state", state.to_str().unwrap()], "a\n");
    assert_eq!(exit_code, 1);
    assert!(stderr.contains("template state"));
    // the broken file is left for the user to inspect
    assert_eq!(fs::read_to_string(&state).unwrap(), "{ definitely not json");
}

#[test]
fn test_config_file_defaults_and_aliases() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("drainflow.ini");
    fs::write(
        &config,
        "defaults = -p 1\n\n[aliases]\napp = -f json --message-field msg\n",
    )
    .unwrap();
    let config_arg = config.to_str().unwrap();

    let input = "{\"msg\": \"hello there\"}\n";
    let (stdout, stderr, exit_code) =
        run_drainflow_with_input(&["--config-file", config_arg, "-a", "app"], input);
    assert_eq!(exit_code, 0, "{}", stderr);
    assert_eq!(parse_records(&stdout)[0]["template"], "hello there");

    // Without the alias the same line is plain text
    let (stdout, _stderr, _exit_code) =
        run_drainflow_with_input(&["--config-file", config_arg], input);
    assert_eq!(parse_records(&stdout)[0]["message"], "{\"msg\": \"hello there\"}");
}

#[test]
fn test_completions() {
    let (stdout, _stderr, exit_code) = run_drainflow_with_input(&["--completions", "bash"], "");
    assert_eq!(exit_code, 0);
    assert!(stdout.contains("drainflow"));
    assert!(stdout.contains("--sync-period"));
}

#[test]
fn test_json_log_format() {
    let (_stdout, stderr, exit_code) =
        run_drainflow_with_input(&["--log-format", "json", "-f", "json"], "not json\n");
    assert_eq!(exit_code, 0);

    let warning = stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|event| event["level"] == "WARN")
        .expect("dropped line logged as a JSON event");
    assert_eq!(warning["fields"]["kind"], "invalid_json");
    assert_eq!(warning["fields"]["line"], 1);
}
