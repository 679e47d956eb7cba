//! Integration tests for the switchyard CLI.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const ENGINES: &str = r#"{
    "transformOptions": {
        "resize": [
            {"group": {"transformOptions": [
                {"value": {"name": "width", "required": true}},
                {"value": {"name": "height", "required": true}}
            ]}}
        ]
    },
    "transformers": [
        {"transformerName": "office",
         "supportedSourceAndTargetList": [
            {"sourceMediaType": "application/msword", "targetMediaType": "application/pdf"}
         ]},
        {"transformerName": "pdfrenderer",
         "transformOptions": ["resize"],
         "supportedSourceAndTargetList": [
            {"sourceMediaType": "application/pdf", "targetMediaType": "image/png", "maxSourceSizeBytes": 1000}
         ]}
    ]
}"#;

const COMPOSITES: &str = r#"
transformers:
  - transformerName: wordToPng
    transformerPipeline:
      - transformerName: office
        targetMediaType: application/pdf
      - transformerName: pdfrenderer
removeTransformers:
  - ghost
"#;

/// A temp directory holding two fragments and an empty config file.
fn setup() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("fragments")).unwrap();
    fs::write(dir.path().join("fragments").join("10-engines.json"), ENGINES).unwrap();
    fs::write(dir.path().join("fragments").join("20-composites.yaml"), COMPOSITES).unwrap();
    fs::write(dir.path().join("config.toml"), "fragments = [\"fragments\"]\n").unwrap();
    dir
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_switchyard"))
        .arg("--config")
        .arg(dir.join("config.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_help() {
    let dir = setup();
    let output = run(dir.path(), &["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Transform routing"));
}

#[test]
fn test_list() {
    let dir = setup();
    let output = run(dir.path(), &["list"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("office [engine]"));
    assert!(out.contains("wordToPng [pipeline]"));
    assert!(out.contains("steps: office -> pdfrenderer"));
    assert!(out.contains("application/msword -> image/png (unlimited, priority 50)"));
    assert!(out.contains("Total: 3 transformers"));
}

#[test]
fn test_merge_json_with_warnings() {
    let dir = setup();
    let output = run(dir.path(), &["merge", "--format", "json"]);
    assert!(output.status.success());

    let merged: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<_> = merged["transformers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["transformerName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["office", "pdfrenderer", "wordToPng"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("removeTransformers"));
    assert!(stderr.contains("ghost"));
}

#[test]
fn test_merge_yaml_reingests() {
    let dir = setup();
    let output = run(dir.path(), &["merge", "--format", "yaml"]);
    assert!(output.status.success());
    let merged_path = dir.path().join("merged.yaml");
    fs::write(&merged_path, &output.stdout).unwrap();

    let output = run(
        dir.path(),
        &["--fragment", merged_path.to_str().unwrap(), "list"],
    );
    assert!(output.status.success());
    assert!(stdout(&output).contains("Total: 3 transformers"));
}

#[test]
fn test_find() {
    let dir = setup();
    let output = run(
        dir.path(),
        &["find", "application/msword", "image/png", "--size", "500"],
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "wordToPng");

    let output = run(
        dir.path(),
        &["find", "application/pdf", "image/png", "--size", "1001"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output).trim(), "none");
}

#[test]
fn test_find_with_options() {
    let dir = setup();
    let output = run(
        dir.path(),
        &["find", "application/pdf", "image/png", "-o", "width=10"],
    );
    assert_eq!(output.status.code(), Some(1));

    let output = run(
        dir.path(),
        &[
            "find",
            "application/pdf",
            "image/png",
            "-o",
            "width=10",
            "-o",
            "height=10",
        ],
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "pdfrenderer");

    let output = run(dir.path(), &["find", "a", "b", "-o", "novalue"]);
    assert!(!output.status.success());
}

#[test]
fn test_find_with_rendition() {
    let dir = setup();
    fs::write(
        dir.path().join("config.toml"),
        r#"
fragments = ["fragments"]

[renditions.thumb]
options = { width = "100" }
"#,
    )
    .unwrap();

    let output = run(
        dir.path(),
        &["find", "application/pdf", "image/png", "--rendition", "thumb"],
    );
    assert_eq!(output.status.code(), Some(1));

    let output = run(
        dir.path(),
        &[
            "find",
            "application/pdf",
            "image/png",
            "--rendition",
            "thumb",
            "-o",
            "height=100",
        ],
    );
    assert!(output.status.success());
}

#[test]
fn test_max_size() {
    let dir = setup();
    let output = run(dir.path(), &["max-size", "application/pdf", "image/png"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "1000");

    let output = run(dir.path(), &["max-size", "application/msword", "image/png"]);
    assert_eq!(stdout(&output).trim(), "-1");

    let output = run(dir.path(), &["max-size", "text/plain", "image/png"]);
    assert_eq!(stdout(&output).trim(), "0");
}

#[test]
fn test_plan() {
    let dir = setup();
    let output = run(dir.path(), &["plan", "application/msword", "image/png"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("wordToPng (application/msword -> image/png) [pipeline]"));
    assert!(out.contains("  office (application/msword -> application/pdf)"));
    assert!(out.contains("  pdfrenderer (application/pdf -> image/png)"));
    assert!(out.contains("Engine steps: 2"));
}

#[test]
fn test_check_context() {
    let dir = setup();
    let path = dir.path().join("ctx.json");
    fs::write(
        &path,
        r#"{
            "options": {"width": "100"},
            "sourceReference": "abc",
            "levels": [
                {"kind": "P", "stepCount": 1, "cursor": 0, "reference": 123,
                 "startTime": "2026-01-01T00:00:00Z", "retries": 0,
                 "steps": [["wordToPng", "application/msword", "image/png"]]},
                {"kind": "P", "stepCount": 2, "cursor": 1, "reference": 2,
                 "startTime": "2026-01-01T00:00:01Z", "retries": 1,
                 "steps": [["office", "application/msword", "application/pdf"],
                           ["pdfrenderer", "application/pdf", "image/png"]]}
            ]
        }"#,
    )
    .unwrap();

    let output = run(dir.path(), &["check-context", path.to_str().unwrap()]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("reference: 123.2"));
    assert!(out.contains("current step: pdfrenderer (application/pdf -> image/png)"));
    assert!(out.contains("parent: wordToPng (pipeline)"));
    assert!(out.contains("retries: 1"));

    fs::write(&path, r#"{"options": {}, "levels": []}"#).unwrap();
    let output = run(dir.path(), &["check-context", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid execution context"));
}

#[test]
fn test_completions() {
    let dir = setup();
    let output = run(dir.path(), &["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("switchyard"));
}
