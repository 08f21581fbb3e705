//
// mailmirror - logging
//
// This file is part of mailmirror.
//
// mailmirror is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// mailmirror is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with mailmirror. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::{
    error::{Error, ErrorKind, Result},
    utils::datetime,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, PartialOrd, Serialize)]
#[repr(u8)]
pub enum LogLevel {
    OFF = 0,
    ERROR,
    WARN,
    #[default]
    INFO,
    DEBUG,
    TRACE,
}

impl From<u8> for LogLevel {
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::OFF,
            1 => Self::ERROR,
            2 => Self::WARN,
            3 => Self::INFO,
            4 => Self::DEBUG,
            _ => Self::TRACE,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(l: Level) -> Self {
        match l {
            Level::Error => Self::ERROR,
            Level::Warn => Self::WARN,
            Level::Info => Self::INFO,
            Level::Debug => Self::DEBUG,
            Level::Trace => Self::TRACE,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::OFF => Self::Off,
            LogLevel::ERROR => Self::Error,
            LogLevel::WARN => Self::Warn,
            LogLevel::INFO => Self::Info,
            LogLevel::DEBUG => Self::Debug,
            LogLevel::TRACE => Self::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::OFF => "OFF",
                Self::ERROR => "ERROR",
                Self::WARN => "WARN",
                Self::INFO => "INFO",
                Self::DEBUG => "DEBUG",
                Self::TRACE => "TRACE",
            }
        )
    }
}

/// Where log lines end up.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, PartialOrd, Serialize)]
pub enum Destination {
    File,
    #[default]
    Stderr,
    None,
}

struct FileOutput {
    writer: Option<BufWriter<std::fs::File>>,
    path: PathBuf,
}

#[derive(Clone)]
pub struct StderrLogger {
    dest: Arc<Mutex<FileOutput>>,
    level: Arc<AtomicU8>,
    print_level: bool,
    print_module_names: bool,
    debug_dest: Destination,
}

impl std::fmt::Debug for StderrLogger {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(StderrLogger))
            .field("level", &self.log_level())
            .field("print_level", &self.print_level)
            .field("print_module_names", &self.print_module_names)
            .field("debug_dest", &self.debug_dest)
            .finish()
    }
}

impl Default for StderrLogger {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl StderrLogger {
    /// Creates a logger printing to stderr and installs it as the global
    /// `log` logger the first time it is called in a process.
    pub fn new(level: LogLevel) -> Self {
        use std::sync::Once;

        static INIT_STDERR_LOGGING: Once = Once::new();

        let logger = Self {
            dest: Arc::new(Mutex::new(FileOutput {
                writer: None,
                path: PathBuf::new(),
            })),
            level: Arc::new(AtomicU8::new(level as u8)),
            print_level: true,
            print_module_names: true,
            debug_dest: Destination::Stderr,
        };
        log::set_max_level(LevelFilter::from(logger.log_level()));

        INIT_STDERR_LOGGING.call_once(|| {
            // Another logger may already be installed by the embedding
            // application.
            _ = log::set_boxed_logger(Box::new(logger.clone()));
        });
        logger
    }

    /// Creates a logger from the `[log]` section of the settings.
    pub fn from_settings(settings: &crate::conf::LogSettings) -> Result<Self> {
        let mut ret = Self::new(settings.level);
        if let Some(path) = settings.file.as_deref() {
            ret.change_log_dest(path)?;
        }
        Ok(ret)
    }

    pub fn log_level(&self) -> LogLevel {
        self.level.load(Ordering::SeqCst).into()
    }

    pub fn set_log_level(&self, new_val: LogLevel) {
        self.level.store(new_val as u8, Ordering::SeqCst);
        log::set_max_level(LevelFilter::from(new_val));
    }

    /// Appends log lines to `path` instead of printing them to stderr.
    pub fn change_log_dest(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .read(true)
            .open(path)
            .map_err(|err| {
                Error::new(format!("Could not open log file {}", path.display()))
                    .set_kind(ErrorKind::from(err.kind()))
                    .set_source(Some(Arc::new(err)))
            })?;
        let mut dest = self.dest.lock()?;
        *dest = FileOutput {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
        };
        self.debug_dest = Destination::File;
        Ok(())
    }

    pub fn log_dest(&self) -> PathBuf {
        self.dest
            .lock()
            .map(|d| d.path.clone())
            .unwrap_or_default()
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !matches!(self.debug_dest, Destination::None)
            && metadata.level() <= LevelFilter::from(self.log_level())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        fn write(
            writer: &mut impl Write,
            record: &Record,
            (print_level, print_module_names): (bool, bool),
        ) -> Option<()> {
            writer
                .write_all(datetime::timestamp_to_string(datetime::now(), None).as_bytes())
                .ok()?;
            writer.write_all(b" [").ok()?;
            if print_level {
                writer
                    .write_all(record.level().to_string().as_bytes())
                    .ok()?;
            }
            write!(writer, "]: ").ok()?;
            if print_module_names {
                write!(writer, "{}: ", record.metadata().target()).ok()?;
            }
            write!(writer, "{}", record.args()).ok()?;
            writer.write_all(b"\n").ok()?;
            writer.flush().ok()?;
            Some(())
        }

        match self.debug_dest {
            Destination::None => {}
            Destination::File => {
                _ = self.dest.lock().ok().and_then(|mut d| {
                    d.writer.as_mut().and_then(|w| {
                        write(w, record, (self.print_level, self.print_module_names))
                    })
                });
            }
            Destination::Stderr => {
                _ = write(
                    &mut std::io::stderr(),
                    record,
                    (self.print_level, self.print_module_names),
                );
            }
        }
    }

    fn flush(&self) {
        self.dest
            .lock()
            .ok()
            .and_then(|mut d| d.writer.as_mut().and_then(|w| w.flush().ok()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_level_conversions() {
        assert_eq!(LogLevel::from(0), LogLevel::OFF);
        assert_eq!(LogLevel::from(9), LogLevel::TRACE);
        assert_eq!(LogLevel::from(Level::Warn), LogLevel::WARN);
        assert_eq!(LevelFilter::from(LogLevel::DEBUG), LevelFilter::Debug);
        assert!(LogLevel::ERROR < LogLevel::INFO);
        assert_eq!(LogLevel::TRACE.to_string(), "TRACE");
    }

    #[test]
    fn test_logging_file_destination() {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let path = tmp_dir.path().join("mailmirror.log");
        let mut logger = StderrLogger::new(LogLevel::TRACE);
        logger.change_log_dest(&path).unwrap();
        assert_eq!(logger.log_dest(), path);
        logger.log(
            &Record::builder()
                .args(format_args!("indexed 3 documents"))
                .level(Level::Info)
                .target("mailmirror::index")
                .build(),
        );
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO]: mailmirror::index: indexed 3 documents"));
    }
}
