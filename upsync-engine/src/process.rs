//! Child processes with a wall-clock limit.
//!
//! Both pipes are drained on helper threads so a chatty child cannot block
//! on a full pipe while the parent polls for exit. On unix the child leads
//! its own process group and the whole group is killed on expiry, so
//! helpers it forked (`ssh`, `git-remote-https`, shells) go with it.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for pipe output once a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured result of one child process.
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    /// `None` when the child was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// stdout then stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Run `command` to completion, killing it and everything it spawned once
/// `timeout` has elapsed. A `None` timeout waits indefinitely. Spawn
/// failures are returned as-is.
pub(crate) fn run(mut command: Command, timeout: Option<Duration>) -> std::io::Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = command.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            kill_tree(&mut child);
            timed_out = true;
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = started.elapsed();

    // A killed child may leave a straggler holding the pipes open; never
    // wait on it past the grace period.
    let collect = |rx: Receiver<String>| {
        if timed_out {
            rx.recv_timeout(DRAIN_GRACE).unwrap_or_default()
        } else {
            rx.recv().unwrap_or_default()
        }
    };

    Ok(ProcessOutput {
        exit_code: status.and_then(|s| s.code()),
        success: status.is_some_and(|s| s.success()),
        stdout: collect(stdout),
        stderr: collect(stderr),
        timed_out,
        elapsed,
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child leads its group, so its pid is the group id.
    let group = format!("-{}", child.id());
    let _ = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let out = run(sh("echo out; echo err >&2; exit 3"), None).expect("run");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
        assert!(!out.timed_out);
        assert_eq!(out.combined(), "out\nerr");
    }

    #[test]
    fn kills_child_after_timeout() {
        let out = run(sh("sleep 5"), Some(Duration::from_millis(200))).expect("run");
        assert!(out.timed_out);
        assert!(!out.success);
        assert_eq!(out.exit_code, None);
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_forked_grandchildren_too() {
        // `sleep; true` keeps the shell alive, so the sleep is a grandchild
        // holding both pipes.
        let out = run(sh("sleep 5; true"), Some(Duration::from_millis(300))).expect("run");
        assert!(out.timed_out);
        assert!(!out.success);
        assert!(out.elapsed < Duration::from_secs(3), "took {:?}", out.elapsed);
    }

    #[test]
    fn timeout_returns_even_if_a_background_job_keeps_the_pipes() {
        let started = Instant::now();
        let out = run(
            sh("(sleep 5; echo late) & sleep 5; true"),
            Some(Duration::from_millis(300)),
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!out.stdout.contains("late"));
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let out = run(sh("head -c 200000 /dev/zero | tr '\\0' x"), Some(Duration::from_secs(10)))
            .expect("run");
        assert!(out.success);
        assert_eq!(out.stdout.len(), 200_000);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run(Command::new("upsync-no-such-program"), None).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
