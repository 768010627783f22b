// Command-line tests for ptcg.
//
// Drive the built binary against the demo models and check exit codes,
// emitted stages and the files written under the code directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn ptcg_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ptcg"))
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_dir(prefix: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), n));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn ptcg(args: &[&str]) -> Output {
    Command::new(ptcg_binary())
        .args(args)
        .output()
        .expect("failed to run ptcg")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn no_model_is_a_usage_error() {
    let output = ptcg(&[]);
    assert_eq!(output.status.code(), Some(255), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("no model given"));
}

#[test]
fn unknown_dialect_exits_minus_two() {
    let model = demo("scaled_ramp.json");
    let output = ptcg(&["--dialect", "arduino", "--emit", "code", model.to_str().unwrap()]);
    // -2 as seen by the parent process
    assert_eq!(output.status.code(), Some(254), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("E0101"));
}

#[test]
fn emit_code_prints_program() {
    let model = demo("scaled_ramp.json");
    let output = ptcg(&["--emit", "code", model.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let code = stdout(&output);
    assert!(code.contains("int main(int argc, char *argv[]) {"));
    assert!(code.contains("ScaledRamp_Scale_input = InttoDouble(ScaledRamp_Ramp_output);"));
}

#[test]
fn emit_file_writes_under_code_directory() {
    let dir = temp_dir("ptcg_cli_file");
    let model = demo("summed_sources.json");
    let output = ptcg(&[
        "--code-directory",
        dir.to_str().unwrap(),
        model.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let written = std::fs::read_to_string(dir.join("SummedSources.c")).unwrap();
    assert!(written.contains("SummedSources_Stage_Add_plus[0] = SummedSources_Stage_a;"));
    assert!(written.contains("SummedSources_Show_input[0] = SummedSources_Stage_sum;"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn overwrite_fail_refuses_existing_file() {
    let dir = temp_dir("ptcg_cli_overwrite");
    let model = demo("scaled_ramp.json");
    let args = [
        "--code-directory",
        dir.to_str().unwrap(),
        "--overwrite",
        "fail",
        model.to_str().unwrap(),
    ];
    assert!(ptcg(&args).status.success());
    let second = ptcg(&args);
    assert_eq!(second.status.code(), Some(1));
    assert!(stderr(&second).contains("E0503"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn java_language_and_overrides() {
    let model = demo("summed_sources.json");
    let output = ptcg(&[
        "--language",
        "java",
        "-P",
        "offset=40",
        "--emit",
        "code",
        model.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let code = stdout(&output);
    assert!(code.contains("public class SummedSources {"));
    assert!(code.contains("SummedSources_Counter_state = 40;"));
}

#[test]
fn malformed_override_is_a_usage_error() {
    let model = demo("scaled_ramp.json");
    let output = ptcg(&["-P", "novalue", model.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(255));
    assert!(stderr(&output).contains("E0102"));
}

#[test]
fn emit_adapters_reports_json() {
    let model = demo("embedded_code.json");
    let output = ptcg(&["--emit", "adapters", model.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let entries = report.as_array().unwrap();
    let twice = entries
        .iter()
        .find(|e| e["object"] == ".Embedded.Twice")
        .unwrap();
    assert_eq!(twice["found_as"], "auto");
    assert_eq!(twice["adapter"], "template-actor");
}

#[cfg(unix)]
#[test]
fn run_command_exit_code_is_returned() {
    let dir = temp_dir("ptcg_cli_run");
    let model = demo("scaled_ramp.json");
    let output = ptcg(&[
        "--code-directory",
        dir.to_str().unwrap(),
        "--run-command",
        "test -f @fileName@ && exit 7",
        model.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(7), "stderr: {}", stderr(&output));
    let _ = std::fs::remove_dir_all(&dir);
}

fn has_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
#[test]
fn run_without_commands_builds_with_defaults() {
    if !has_cc() {
        eprintln!("SKIP: cc not found");
        return;
    }
    let dir = temp_dir("ptcg_cli_default_run");
    let model = demo("scaled_ramp.json");
    let output = ptcg(&[
        "--code-directory",
        dir.to_str().unwrap(),
        "--run",
        model.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(dir.join("ScaledRamp").exists(), "default compile produced no binary");
    assert!(stdout(&output).contains("Show: 0.5"));
    let _ = std::fs::remove_dir_all(&dir);
}
