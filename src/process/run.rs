use crate::program::ProgramSpec;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log_buffer::LogBuffer;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::fmt::Write;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

pub type OutputCache = Arc<Mutex<LogBuffer<Vec<u8>>>>;

pub fn output_cache(size: usize) -> OutputCache {
    Arc::new(Mutex::new(LogBuffer::new(vec![0; size.max(1)])))
}

/// A launched command and the moment it was launched.
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    pub pid: u32,
    pub started: Instant,
}

#[instrument(skip_all, fields(program = %program.name))]
pub fn launch(program: &ProgramSpec, output: &OutputCache) -> Result<Launched> {
    info!("start cmd: {}", program.command);
    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(&program.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if !program.directory.is_empty() {
        command.current_dir(&program.directory);
    }
    for pair in program.env_pairs() {
        match pair {
            Ok((key, value)) => {
                command.env(key, value);
            }
            Err(entry) => warn!("Skipping malformed environment entry {entry:?}"),
        }
    }

    let mut child = command.spawn().wrap_err("Failed to spawn child!")?;
    let started = Instant::now();
    let pid = child.id().ok_or_else(|| eyre!("Child exited instantly"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| eyre!("Missing child stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| eyre!("Missing child stderr"))?;

    spawn_reader(stdout, output.clone(), info_span!("read_stdout", pid));
    spawn_reader(stderr, output.clone(), info_span!("read_stderr", pid));

    info!("Child started: {}", pid);
    Ok(Launched {
        child,
        pid,
        started,
    })
}

fn spawn_reader<R>(stream: R, output: OutputCache, span: Span)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(n) if n < 1 => break,
                    Err(err) => {
                        error!(?err, "Reading output failed");
                        break;
                    }
                    _ => {}
                }
                debug!("Output: {line:?}");
                if let Err(err) = output.lock().write_str(&line) {
                    error!(?err, "Cache error");
                }
            }
            debug!("Output closed");
        }
        .instrument(span),
    );
}

/// Sends SIGKILL to the whole process group led by `pid`.
pub fn kill_group(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).wrap_err("Pid out of range")?;
    killpg(Pid::from_raw(pid), Signal::SIGKILL).wrap_err("Failed to send signal")
}
