// exec.rs — Compile and run the generated program
//
// Runs the configured compile command, then the run command, through the
// platform shell with the code directory as working directory. Commands
// are `@key@` templates over `modelName`, `codeDirectory` and `fileName`.
//
// Preconditions: the generated file has been written.
// Postconditions: returns the exit code of the last command run.
// Failure modes: spawn failure (E0600), timeout (E0601).
// Side effects: spawns child processes; kills a child that outlives the
//   configured timeout.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::substitute::substitute;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Keys available to command templates.
pub fn substitution_map(model_name: &str, code_directory: &Path, file_name: &str) -> HashMap<String, String> {
    HashMap::from([
        ("modelName".to_string(), model_name.to_string()),
        ("codeDirectory".to_string(), code_directory.display().to_string()),
        ("fileName".to_string(), file_name.to_string()),
    ])
}

fn shell(command: &str) -> Command {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    cmd.arg(command);
    cmd
}

fn wait_with_timeout(child: &mut Child, command: &str, timeout: Duration) -> Result<ExitStatus> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CgError::new(
                    ErrorKind::Subprocess,
                    format!("'{}' timed out after {:.1}s", command, timeout.as_secs_f64()),
                )
                .with_code(codes::E0601)
                .with_hint("raise --timeout or drop it to wait indefinitely"));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(CgError::new(
                    ErrorKind::Subprocess,
                    format!("failed to wait for '{}'", command),
                )
                .with_code(codes::E0600)
                .with_source(e))
            }
        }
    }
}

/// Run one shell command in `dir`; its exit code, or -1 if killed by a
/// signal.
pub fn run_command(command: &str, dir: &Path, timeout: Option<Duration>) -> Result<i32> {
    log::info!("running '{}' in {}", command, dir.display());
    let mut child = shell(command).current_dir(dir).spawn().map_err(|e| {
        CgError::new(ErrorKind::Subprocess, format!("failed to spawn '{}'", command))
            .with_code(codes::E0600)
            .with_source(e)
    })?;

    let status = match timeout {
        Some(limit) => wait_with_timeout(&mut child, command, limit)?,
        None => child.wait().map_err(|e| {
            CgError::new(ErrorKind::Subprocess, format!("failed to wait for '{}'", command))
                .with_code(codes::E0600)
                .with_source(e)
        })?,
    };
    let code = status.code().unwrap_or(-1);
    log::debug!("'{}' exited with {}", command, code);
    Ok(code)
}

/// Compile, then run. A failing compile stops before the run.
pub fn compile_and_run(
    compile_command: Option<&str>,
    run_command_template: Option<&str>,
    map: &HashMap<String, String>,
    dir: &Path,
    timeout: Option<Duration>,
) -> Result<i32> {
    let mut last = 0;
    if let Some(template) = compile_command {
        last = run_command(&substitute(template, map), dir, timeout)?;
        if last != 0 {
            log::warn!("compile command exited with {}; not running", last);
            return Ok(last);
        }
    }
    if let Some(template) = run_command_template {
        last = run_command(&substitute(template, map), dir, timeout)?;
    }
    Ok(last)
}
