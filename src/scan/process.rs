// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2026 Bartek Kus
// Feature: PRISMA_IMAGE_SCAN

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long the pipes may stay open once the scanner itself is gone. Anything
/// it started in the background can hold them indefinitely.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Shared flag a caller flips to abandon a running scan.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum WaitOutcome {
    Exited { status: ExitStatus, output: Captured },
    TimedOut { output: Captured },
    Cancelled { output: Captured },
}

/// Spawns `cmd` and waits for it, bounded by `timeout` and `cancel`.
///
/// Stdout and stderr are drained on their own threads while the child runs,
/// otherwise a scanner that writes more than a pipe buffer would block
/// forever. On unix the child leads its own process group; on timeout or
/// cancellation the whole group is killed and the child reaped before
/// returning. Readers still blocked after `READER_GRACE` are abandoned.
pub fn run_bounded(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> io::Result<WaitOutcome> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if cancel.is_cancelled() {
            stop(&mut child);
            break None;
        }
        if Instant::now() >= deadline {
            stop(&mut child);
            let output = collect(stdout_reader, stderr_reader);
            return Ok(WaitOutcome::TimedOut { output });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let output = collect(stdout_reader, stderr_reader);
    Ok(match status {
        Some(status) => WaitOutcome::Exited { status, output },
        None => WaitOutcome::Cancelled { output },
    })
}

fn stop(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child.id());
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill scanner process {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        log::warn!("Failed to reap scanner process {}: {}", child.id(), e);
    }
}

/// Kills every process in the group led by `pgid`, so helpers the scanner
/// forked do not outlive it.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => log::debug!("kill for process group {} exited with {}", pgid, s),
        Err(e) => log::warn!("Failed to signal process group {}: {}", pgid, e),
    }
}

/// Forwards whatever the pipe yields in chunks, so output read before a
/// reader is abandoned is not lost with it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        rx
    })
}

fn collect(stdout: Option<Receiver<Vec<u8>>>, stderr: Option<Receiver<Vec<u8>>>) -> Captured {
    let until = Instant::now() + READER_GRACE;
    Captured {
        stdout: gather(stdout, until, "stdout"),
        stderr: gather(stderr, until, "stderr"),
    }
}

fn gather(rx: Option<Receiver<Vec<u8>>>, until: Instant, stream: &str) -> String {
    let mut buf = Vec::new();
    if let Some(rx) = rx {
        loop {
            match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Scanner {} still open {:?} after exit; abandoning its reader",
                        stream,
                        READER_GRACE
                    );
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
