//! §4.5 Executor — runs one job to terminal status.
//!
//! The child is spawned in its own process group so the whole subtree can
//! be terminated by signalling the group. Supervision is a single
//! `tokio::select!` loop: timeout, cancellation, and the two output
//! streams are just branches of that loop, and the loop's own structure is
//! the "finished" guard from spec §9 — the child-exit branch is the only
//! one that breaks out, so exactly one terminal transition is ever
//! produced per job.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::logsink::LogSink;
use crate::schema::{JobStatus, ScriptEntry};

/// A duration long enough to behave as "no timeout" without any special
/// casing in the select loop.
const NO_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

pub struct ExecOutcome {
    pub status: JobStatus,
    pub code: i32,
    pub stdout_size: u64,
    pub stdout_truncated: bool,
    pub stdout_preview: String,
    pub stderr_size: u64,
    pub stderr_truncated: bool,
    pub stderr_preview: String,
}

/// Single-quote shell escaping: wrap in `'...'`, replacing embedded `'`
/// with `'\''`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn build_command_line(script: &ScriptEntry, args: &[String]) -> String {
    let mut parts = vec![shell_quote(&script.path)];
    parts.extend(args.iter().map(|a| shell_quote(a)));
    parts.join(" ")
}

#[allow(clippy::too_many_arguments)]
pub async fn run_job(
    job_id: &str,
    script: &ScriptEntry,
    args: &[String],
    log_sink: &LogSink,
    cap_bytes: u64,
    preview_max_bytes: u64,
    cancel_notify: Arc<Notify>,
    already_cancel_requested: bool,
) -> ExecOutcome {
    let (mut stdout_writer, mut stderr_writer) =
        match log_sink.open_writers(job_id, cap_bytes, preview_max_bytes) {
            Ok(w) => w,
            Err(e) => {
                warn!(job_id, error = %e, "failed to open log files");
                return ExecOutcome {
                    status: JobStatus::Failed,
                    code: -1,
                    stdout_size: 0,
                    stdout_truncated: false,
                    stdout_preview: String::new(),
                    stderr_size: 0,
                    stderr_truncated: false,
                    stderr_preview: format!("log sink error: {e}"),
                };
            }
        };

    let command_line = build_command_line(script, args);

    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(&command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // New process group so timeout/cancel can terminate the whole subtree.
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(job_id, error = %e, "spawn failed");
            stderr_writer
                .write_chunk(format!("spawn error: {e}\n").as_bytes())
                .ok();
            let preview = stderr_writer.finalize_preview();
            return ExecOutcome {
                status: JobStatus::Failed,
                code: -1,
                stdout_size: 0,
                stdout_truncated: false,
                stdout_preview: String::new(),
                stderr_size: stderr_writer.size(),
                stderr_truncated: stderr_writer.truncated(),
                stderr_preview: preview,
            };
        }
    };

    let pid = child.id();
    info!(job_id, pid, "child process started");

    if already_cancel_requested {
        // Cancellation landed in the store before this task registered its
        // `Notify` (a completion-triggered `drain()` admitted this job
        // concurrently with a `cancelJob` call) — the notify-driven branch
        // below is permanently disabled in that case, so terminate here
        // instead of waiting for a signal that will never arrive.
        info!(job_id, "job already canceled at spawn time, sending SIGTERM to process group");
        terminate(pid);
    }

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");
    let mut stdout_buf = [0u8; 8192];
    let mut stderr_buf = [0u8; 8192];
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut timed_out = false;
    let mut cancel_requested = already_cancel_requested;

    let sleep_dur = if script.timeout_sec > 0 {
        Duration::from_secs(script.timeout_sec)
    } else {
        NO_TIMEOUT
    };
    let sleep = tokio::time::sleep(sleep_dur);
    tokio::pin!(sleep);

    let exit_status = loop {
        tokio::select! {
            biased;

            status = child.wait() => {
                break status;
            }

            _ = &mut sleep, if !timed_out && !cancel_requested => {
                timed_out = true;
                info!(job_id, "timeout reached, sending SIGTERM to process group");
                terminate(pid);
            }

            _ = cancel_notify.notified(), if !cancel_requested => {
                cancel_requested = true;
                info!(job_id, "cancellation requested, sending SIGTERM to process group");
                terminate(pid);
            }

            n = stdout.read(&mut stdout_buf), if !stdout_done => {
                match n {
                    Ok(0) => stdout_done = true,
                    Ok(n) => { let _ = stdout_writer.write_chunk(&stdout_buf[..n]); }
                    Err(_) => stdout_done = true,
                }
            }

            n = stderr.read(&mut stderr_buf), if !stderr_done => {
                match n {
                    Ok(0) => stderr_done = true,
                    Ok(n) => { let _ = stderr_writer.write_chunk(&stderr_buf[..n]); }
                    Err(_) => stderr_done = true,
                }
            }
        }
    };

    // Drain any remaining buffered output now that the child has exited.
    if !stdout_done {
        loop {
            match stdout.read(&mut stdout_buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = stdout_writer.write_chunk(&stdout_buf[..n]);
                }
            }
        }
    }
    if !stderr_done {
        loop {
            match stderr.read(&mut stderr_buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = stderr_writer.write_chunk(&stderr_buf[..n]);
                }
            }
        }
    }

    let (status, code) = classify(timed_out, cancel_requested, exit_status.as_ref());
    info!(job_id, ?code, status = status.as_str(), "child process finished");

    let stdout_preview = stdout_writer.finalize_preview();
    let stderr_preview = stderr_writer.finalize_preview();

    ExecOutcome {
        status,
        code,
        stdout_size: stdout_writer.size(),
        stdout_truncated: stdout_writer.truncated(),
        stdout_preview,
        stderr_size: stderr_writer.size(),
        stderr_truncated: stderr_writer.truncated(),
        stderr_preview,
    }
}

/// Exit-priority classification from spec §4.5, evaluated in this exact
/// order. Cancellation and timeout must be checked *before* a signal exit
/// is classified as a generic failure — the one subtle ordering bug spec
/// §9 calls out by name.
fn classify(
    timed_out: bool,
    cancel_requested: bool,
    exit_status: Result<&std::process::ExitStatus, &std::io::Error>,
) -> (JobStatus, i32) {
    if timed_out {
        return (JobStatus::TimedOut, -1);
    }
    if cancel_requested {
        return (JobStatus::Canceled, -1);
    }
    let status = match exit_status {
        Ok(s) => s,
        Err(_) => return (JobStatus::Failed, -1),
    };

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return (JobStatus::Failed, -1);
        }
    }

    match status.code() {
        Some(0) => (JobStatus::Succeeded, 0),
        Some(code) => (JobStatus::Failed, code),
        None => (JobStatus::Failed, -1),
    }
}

/// Send SIGTERM to the child's process group, falling back to signalling
/// the direct pid if the group signal fails (spec §4.5).
#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let pid = pid as i32;

    // A negative pid targets the whole process group.
    if let Err(e) = kill(Pid::from_raw(-pid), Signal::SIGTERM)
        && e != nix::errno::Errno::ESRCH
    {
        warn!(pid, error = %e, "process-group SIGTERM failed; falling back to direct pid");
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn builds_command_line_with_args() {
        let script = ScriptEntry {
            id: "ok".into(),
            path: "/bin/echo".into(),
            mode: None,
            timeout_sec: 0,
            args: crate::schema::ScriptArgsPolicy {
                max_items: 4,
                item_pattern: ".*".into(),
                item_max_length: 64,
            },
        };
        let line = build_command_line(&script, &["hello".into(), "world".into()]);
        assert_eq!(line, "'/bin/echo' 'hello' 'world'");
    }
}
