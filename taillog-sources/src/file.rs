use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};
use taillog_framework::{
    BufLineReader, LineRead, LogProvider, OpenError, Preparation, SourceOptions,
};

const OPEN_RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Reads a file from the beginning on every open; `.gz` files are decompressed.
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_options(options: &SourceOptions) -> Result<Self> {
        let path = options
            .file_name
            .as_ref()
            .context("file source requires 'file_name'")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_gzip(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
    }

    /// transient failures such as sharing violations are retried for a while
    fn open_file(&self, cancelled: &AtomicBool) -> Result<File, OpenError> {
        let deadline = Instant::now() + OPEN_RETRY_TIMEOUT;
        loop {
            match File::open(&self.path) {
                Ok(file) => return Ok(file),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(OpenError::NotFound(self.path.display().to_string()));
                }
                Err(_) if cancelled.load(Ordering::Acquire) => return Err(OpenError::Cancelled),
                Err(err) if Instant::now() < deadline => {
                    debug!("Unable to open {}, retrying: {}", self.path.display(), err);
                    thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(err) => return Err(OpenError::Io(err)),
            }
        }
    }
}

impl LogProvider for FileProvider {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn prepare(&mut self) -> Preparation {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_file() => Preparation::Ready,
            Ok(_) => Preparation::Error(format!("{} is not a file", self.path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Preparation::NotFound(self.path.display().to_string())
            }
            Err(err) => Preparation::Error(err.to_string()),
        }
    }

    fn open(&mut self, cancelled: &AtomicBool) -> Result<Box<dyn LineRead>, OpenError> {
        let file = self.open_file(cancelled)?;
        if self.is_gzip() {
            Ok(Box::new(BufLineReader::new(BufReader::new(GzDecoder::new(file)))))
        } else {
            Ok(Box::new(BufLineReader::new(BufReader::new(file))))
        }
    }

    fn file_name(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}
