use crate::channel::ChannelLineReader;
use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::{
    io,
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use taillog_framework::{LineRead, LogProvider, OpenError, Preparation, SourceOptions};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    runtime::Runtime,
};

const LINE_CHANNEL_CAPACITY: usize = 1024;
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct CommandLine {
    program: String,
    arguments: Vec<String>,
    working_directory: Option<PathBuf>,
}

/// log provider reading the standard output of a command, one process per open
pub struct ProcessProvider {
    command: CommandLine,
}

impl ProcessProvider {
    pub fn new(program: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            command: CommandLine {
                program: program.into(),
                arguments,
                working_directory: None,
            },
        }
    }

    pub fn with_working_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.command.working_directory = Some(directory.into());
        self
    }

    pub fn from_options(options: &SourceOptions) -> Result<Self> {
        let program = options
            .command
            .as_ref()
            .context("process source requires 'command'")?;
        let mut provider = Self::new(program, options.arguments.clone());
        if let Some(directory) = &options.working_directory {
            provider = provider.with_working_directory(directory);
        }
        Ok(provider)
    }
}

impl LogProvider for ProcessProvider {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn prepare(&mut self) -> Preparation {
        match &self.command.working_directory {
            Some(directory) if !directory.is_dir() => {
                Preparation::NotFound(format!("working directory {}", directory.display()))
            }
            _ => Preparation::Ready,
        }
    }

    fn open(&mut self, cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        let (line_sender, line_receiver) = crossbeam_channel::bounded(LINE_CHANNEL_CAPACITY);
        let (spawn_sender, spawn_receiver) = crossbeam_channel::bounded(1);
        let should_stop = Arc::new(AtomicBool::new(false));

        let command = self.command.clone();
        let stop = Arc::clone(&should_stop);
        thread::Builder::new()
            .name(format!("process-{}", self.command.program))
            .spawn(move || {
                // we need a tokio runtime in this thread
                let rt = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = spawn_sender.send(Err(e));
                        return;
                    }
                };
                rt.block_on(run_command(command, line_sender, spawn_sender, stop));
            })?;

        let spawned = loop {
            match spawn_receiver.recv_timeout(STOP_CHECK_INTERVAL) {
                Ok(spawned) => break spawned,
                Err(RecvTimeoutError::Timeout) if cancelled.load(Ordering::Acquire) => {
                    should_stop.store(true, Ordering::Release);
                    return Err(OpenError::Cancelled);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(OpenError::Other(format!(
                        "{} exited before starting",
                        self.command.program
                    )));
                }
            }
        };
        match spawned {
            Ok(()) => Ok(Box::new(ChannelLineReader::new(line_receiver, should_stop))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(OpenError::DependencyNotFound(self.command.program.clone()))
            }
            Err(e) => Err(OpenError::Io(e)),
        }
    }
}

async fn run_command(
    command: CommandLine,
    lines: Sender<String>,
    spawned: Sender<io::Result<()>>,
    should_stop: Arc<AtomicBool>,
) {
    let mut process = Command::new(&command.program);
    process
        .args(&command.arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(directory) = &command.working_directory {
        process.current_dir(directory);
    }

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::error!("Failed to spawn {}: {}", command.program, e);
            let _ = spawned.send(Err(e));
            return;
        }
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = spawned.send(Err(io::Error::other("standard output is not captured")));
        return;
    };
    let _ = spawned.send(Ok(()));
    log::debug!("{} started, streaming its output", command.program);

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        if should_stop.load(Ordering::Acquire) {
            log::debug!("Stop signal received, killing {}", command.program);
            let _ = child.start_kill();
            break;
        }

        // partial reads stay in `buf` when the timeout fires
        match tokio::time::timeout(STOP_CHECK_INTERVAL, reader.read_until(b'\n', &mut buf)).await {
            Ok(Ok(0)) => {
                if !buf.is_empty() {
                    let _ = lines.send(decode_line(&mut buf));
                }
                log::debug!("{} output ended", command.program);
                break;
            }
            Ok(Ok(_)) => {
                if buf.last() != Some(&b'\n') {
                    continue;
                }
                if lines.send(decode_line(&mut buf)).is_err() {
                    let _ = child.start_kill();
                    break;
                }
            }
            Ok(Err(e)) => {
                log::warn!("Error reading output of {}: {}", command.program, e);
                break;
            }
            Err(_) => continue,
        }
    }

    match child.wait().await {
        Ok(status) => log::debug!("{} exited with {}", command.program, status),
        Err(e) => log::warn!("Failed to wait for {}: {}", command.program, e),
    }
}

fn decode_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}
