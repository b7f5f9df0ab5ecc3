//! Log setup: a size-rotated file next to the INI file, and warnings echoed
//! to the console with a timestamp.

use std::fmt as std_fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{self, FmtContext};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LOG_FILE_NAME;

pub const MAX_LOG_BYTES: u64 = 50_000;
pub const LOG_BACKUPS: usize = 5;

const CONSOLE_TIME_FORMAT: &str = "%Y-%m-%d %X";
const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Level named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    // An unrecognised name logs everything.
    All,
}

impl LogLevel {
    /// `None` (no argument) means `Info`.
    pub fn from_arg(name: Option<&str>) -> Self {
        match name {
            None => LogLevel::Info,
            Some("debug") => LogLevel::Debug,
            Some("info") => LogLevel::Info,
            Some("warning") => LogLevel::Warning,
            Some("error") => LogLevel::Error,
            Some("critical") => LogLevel::Critical,
            Some(_) => LogLevel::All,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::All => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Append-only log file that starts over once it reaches `max_bytes`,
/// keeping `backups` older files as `<name>.1` .. `<name>.N`.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups > 0 {
            for n in (1..self.backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `<time> - <message>`, optionally with the target and level in between.
struct LineFormat {
    time_format: &'static str,
    verbose: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        write!(writer, "{} - ", Local::now().format(self.time_format))?;
        if self.verbose {
            let meta = event.metadata();
            write!(writer, "{} - {} - ", meta.target(), meta.level())?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber. Keep the guard alive until exit so the
/// file writer flushes.
pub fn init(log_dir: &Path, level: LogLevel) -> io::Result<WorkerGuard> {
    let file = RotatingFile::open(log_dir.join(LOG_FILE_NAME), MAX_LOG_BYTES, LOG_BACKUPS)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(LineFormat {
            time_format: FILE_TIME_FORMAT,
            verbose: true,
        })
        .with_filter(file_filter);

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .event_format(LineFormat {
            time_format: CONSOLE_TIME_FORMAT,
            verbose: false,
        })
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn level_names() {
        assert_eq!(LogLevel::from_arg(None), LogLevel::Info);
        assert_eq!(LogLevel::from_arg(Some("debug")), LogLevel::Debug);
        assert_eq!(LogLevel::from_arg(Some("warning")), LogLevel::Warning);
        assert_eq!(LogLevel::from_arg(Some("critical")), LogLevel::Critical);
        assert_eq!(LogLevel::from_arg(Some("verbose")), LogLevel::All);
        assert_eq!(LogLevel::All.directive(), "trace");
    }

    #[test]
    fn rotates_at_size_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut log = RotatingFile::open(&path, 100, 2).unwrap();
        let line = [b'x'; 60];

        log.write_all(&line).unwrap();
        assert!(!dir.path().join("test.log.1").exists());
        log.write_all(&line).unwrap();
        assert!(dir.path().join("test.log.1").exists());
        log.write_all(&line).unwrap();
        log.write_all(&line).unwrap();
        assert!(dir.path().join("test.log.2").exists());
        log.write_all(&line).unwrap();
        log.write_all(&line).unwrap();
        assert!(!dir.path().join("test.log.3").exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 60);
    }

    #[test]
    fn reopening_continues_the_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        RotatingFile::open(&path, 100, 1).unwrap().write_all(&[b'a'; 80]).unwrap();
        let mut log = RotatingFile::open(&path, 100, 1).unwrap();
        log.write_all(&[b'b'; 30]).unwrap();
        assert_eq!(fs::read(dir.path().join("test.log.1")).unwrap().len(), 80);
    }
}
