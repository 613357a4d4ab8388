//! One-shot sub-protocols: `--validate --meta <json>` and
//! `--print-definition`.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::CmdError;
use crate::validation::{Severity, ValidationWarning, ValidationWarnings};

use super::definition::{Meta, TransformerDefinition};
use super::process::{POLL, exit_code, forward_stderr, read_lines};

pub const VALIDATE_FLAG: &str = "--validate";
pub const META_FLAG: &str = "--meta";
pub const PRINT_DEFINITION_FLAG: &str = "--print-definition";

struct Output {
    lines: Vec<Vec<u8>>,
    code: i32,
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Runs a process to completion, collecting its stdout lines. The whole run
/// is bounded by `timeout`.
fn collect(
    executable: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Output, CmdError> {
    let deadline = Instant::now() + timeout;
    let mut child = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CmdError::Spawn {
            executable: executable.to_string(),
            source,
        })?;
    let pid = child.id();

    let (tx, rx) = unbounded();
    if let Some(stdout) = child.stdout.take() {
        read_lines(stdout, tx);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(stderr, String::new(), executable.to_string(), pid);
    }

    let mut lines = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        select! {
            recv(rx) -> msg => match msg {
                Ok(Ok(line)) => lines.push(line),
                Ok(Err(err)) => {
                    kill(&mut child);
                    return Err(CmdError::Io(err));
                }
                Err(_) => break,
            },
            recv(cancel.signal()) -> _ => {
                kill(&mut child);
                return Err(CmdError::Cancelled);
            }
            default(remaining) => {
                debug!(pid, "one-shot run timed out");
                kill(&mut child);
                return Err(CmdError::ValidationTimeout);
            }
        }
    }

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Output {
                lines,
                code: exit_code(status),
            });
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            return Err(CmdError::ValidationTimeout);
        }
        thread::sleep(POLL);
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Runs `executable args --validate --meta <json>` and collects the
/// warnings it prints, one JSON object per line.
///
/// A line that is not a warning becomes an error warning carrying the raw
/// line as `Payload`. So does an exit code other than `expected_exit_code`.
pub fn run_validation(
    executable: &str,
    args: &[String],
    meta: &Meta,
    expected_exit_code: i32,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ValidationWarnings, CmdError> {
    let mut args = args.to_vec();
    args.push(VALIDATE_FLAG.to_string());
    args.push(META_FLAG.to_string());
    args.push(serde_json::to_string(meta)?);

    let output = collect(executable, &args, timeout, cancel)?;
    let mut warnings = ValidationWarnings::new();
    for line in &output.lines {
        let line = trim_line(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ValidationWarning>(line) {
            Ok(warning) => warnings.push(warning),
            Err(err) => warnings.push(
                ValidationWarning::new()
                    .with_severity(Severity::Error)
                    .with_msg("cannot parse validation warning")
                    .add_meta("Payload", String::from_utf8_lossy(line).into_owned())
                    .add_meta("ParsingError", err.to_string()),
            ),
        }
    }
    if output.code != expected_exit_code {
        warnings.push(
            ValidationWarning::new()
                .with_severity(Severity::Error)
                .with_msg("validation process exited with unexpected code")
                .add_meta("ExpectedExitCode", expected_exit_code)
                .add_meta("ExitCode", output.code),
        );
    }
    Ok(warnings)
}

/// Asks a coprocess for its definition.
pub fn print_definition(
    executable: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<TransformerDefinition, CmdError> {
    let mut args = args.to_vec();
    args.push(PRINT_DEFINITION_FLAG.to_string());
    let output = collect(executable, &args, timeout, cancel)?;
    if output.code != 0 {
        return Err(CmdError::UnexpectedExitCode {
            expected: 0,
            actual: output.code,
        });
    }
    let body: Vec<u8> = output.lines.concat();
    Ok(serde_json::from_slice(&body)?)
}
