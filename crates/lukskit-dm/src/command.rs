//! Runs the `dmsetup` binary with a deadline, feeding secrets over stdin and
//! draining its output on helper threads.

use lukskit_core::error::{LuksError, LuksResult};
use std::io::{Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Initial pipe buffer; `dmsetup` output fits without the buffer regrowing.
const PIPE_BUFFER: usize = 4096;

/// A binary plus the time it is allowed to run.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
}

/// Captured result of one invocation. `table --showkeys` prints key
/// material, so both streams are scrubbed on drop.
#[derive(Debug)]
pub struct Output {
    pub stdout: Zeroizing<String>,
    pub stderr: Zeroizing<String>,
    pub status: i32,
}

impl Output {
    /// Exit status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr when the tool wrote any, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

type Drain = JoinHandle<LuksResult<Zeroizing<String>>>;

impl CommandRunner {
    /// Runner for the binary at `path`; each invocation is killed after `timeout`.
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Path of the wrapped binary, used in error messages.
    pub fn binary(&self) -> &Path {
        &self.path
    }

    /// Run with `args`, writing `input` to stdin when given. Only the exit
    /// code is interpreted by callers; a timeout kills the child.
    pub fn run(&self, args: &[&str], input: Option<&[u8]>) -> LuksResult<Output> {
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                LuksError::Provider(format!("failed to spawn {}: {err}", self.path.display()))
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            // stdin is closed when `stdin` drops so the tool sees EOF.
            stdin.write_all(bytes)?;
        }

        let status = self.wait(&mut child)?;
        Ok(Output {
            stdout: join(stdout, "stdout")?,
            stderr: join(stderr, "stderr")?,
            status: status.code().unwrap_or(-1),
        })
    }

    /// Poll `child` until it exits or the deadline passes, then kill it.
    fn wait(&self, child: &mut Child) -> LuksResult<ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LuksError::Provider(format!(
                    "{} timed out after {:?}",
                    self.path.display(),
                    self.timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read `pipe` to EOF on a helper thread so a chatty child never blocks on
/// a full pipe while we wait for it.
fn drain<R>(pipe: Option<R>) -> Drain
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> LuksResult<Zeroizing<String>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(PIPE_BUFFER));
        if let Some(mut reader) = pipe {
            reader.read_to_end(&mut buf)?;
        }
        Ok(into_text(mem::take(&mut *buf)))
    })
}

fn into_text(bytes: Vec<u8>) -> Zeroizing<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Zeroizing::new(text),
        Err(err) => {
            let bytes = Zeroizing::new(err.into_bytes());
            Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Collect a drain thread's output.
fn join(handle: Drain, stream: &str) -> LuksResult<Zeroizing<String>> {
    handle
        .join()
        .map_err(|_| LuksError::Provider(format!("{stream} reader thread panicked")))?
}
