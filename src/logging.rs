//! Process-wide `tracing` subscriber setup (§6 AMBIENT). Installed once by
//! each binary's `main`; library code only ever calls `tracing::info!`/
//! `tracing::warn!` and never touches a subscriber.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const MAX_LOG_FILE_SIZE: u64 = 100 * 1024 * 1024;
const MAX_LOG_GENERATIONS: usize = 10;

/// Installs the process-wide subscriber for `bin_name`: JSON lines to a
/// file under `log_root` rotated at 100 MiB across 10 generations, and
/// human-readable lines on stderr, both gated by the same `RUST_LOG`
/// (or `info` default) `EnvFilter`.
pub fn init(log_root: PathBuf, bin_name: &str) -> Result<()> {
    let file_writer = RotatingWriter::new(log_root, bin_name, MAX_LOG_GENERATIONS, MAX_LOG_FILE_SIZE)
        .with_context(|| format!("failed to open log file for {bin_name}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter()),
        )
        .try_init()
        .context("tracing subscriber already installed")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// A size-based rotating file: `{bin_name}.log` is the active file, and
/// on exceeding `max_size` it is renamed to `{bin_name}.log.1`, shifting
/// existing generations up to `max_generations`, dropping the oldest.
struct RotatingFile {
    dir: PathBuf,
    base_name: String,
    max_generations: usize,
    max_size: u64,
    file: File,
    current_size: u64,
}

impl RotatingFile {
    fn new(dir: PathBuf, base_name: &str, max_generations: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let base_name = sanitize(base_name);
        let path = dir.join(format!("{base_name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        let mut rotating = Self {
            dir,
            base_name,
            max_generations: max_generations.max(1),
            max_size,
            file,
            current_size,
        };
        if rotating.current_size > rotating.max_size {
            rotating.rotate()?;
        }
        Ok(rotating)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn generation_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.max_generations.saturating_sub(1);
        if oldest > 0 {
            let path = self.generation_path(oldest);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            for index in (1..oldest).rev() {
                let src = self.generation_path(index);
                if src.exists() {
                    fs::rename(&src, self.generation_path(index + 1))?;
                }
            }
            let current = self.current_path();
            if current.exists() {
                fs::rename(&current, self.generation_path(1))?;
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn new(dir: PathBuf, base_name: &str, max_generations: usize, max_size: u64) -> io::Result<Self> {
        let inner = RotatingFile::new(dir, base_name, max_generations, max_size)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

struct RotatingWriterHandle {
    inner: Arc<Mutex<RotatingFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RotatingWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_once_max_size_is_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::new(dir.path().to_path_buf(), "docforge", 3, 16).unwrap();
        file.write_all(b"0123456789").unwrap();
        file.write_all(b"0123456789").unwrap();
        assert!(dir.path().join("docforge.log.1").exists());
        assert!(dir.path().join("docforge.log").exists());
    }

    #[test]
    fn oldest_generation_is_dropped_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::new(dir.path().to_path_buf(), "docforge", 2, 4).unwrap();
        for _ in 0..3 {
            file.write_all(b"aaaaa").unwrap();
        }
        assert!(dir.path().join("docforge.log.1").exists());
        assert!(!dir.path().join("docforge.log.2").exists());
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize("docforge/proxy"), "docforge_proxy");
    }
}
