//
// mailmirror - error module
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

//! Library error type.

use std::{borrow::Cow, fmt, io, result, sync::Arc};

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    /// Unspecified
    #[default]
    None,
    /// Internal invariant violated.
    Bug,
    /// The job or operation was cancelled before it could finish.
    Cancelled,
    /// Invalid or incomplete settings.
    Configuration,
    /// Failure reported by the remote message store.
    External,
    /// The search index or local cache could not be read or written.
    Index,
    NotFound,
    NotSupported,
    /// Platform or environment failure, e.g. missing XDG directories.
    Platform,
    /// A malformed free-text query.
    Query,
    ValueError,
    Io(io::ErrorKind),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "Error"),
            Self::Bug => write!(fmt, "Bug, please report this!"),
            Self::Cancelled => write!(fmt, "Cancelled"),
            Self::Configuration => write!(fmt, "Configuration error"),
            Self::External => write!(fmt, "Remote store error"),
            Self::Index => write!(fmt, "Index error"),
            Self::NotFound => write!(fmt, "Not found"),
            Self::NotSupported => write!(fmt, "Not supported"),
            Self::Platform => write!(fmt, "Platform error"),
            Self::Query => write!(fmt, "Invalid query"),
            Self::ValueError => write!(fmt, "Invalid value"),
            Self::Io(kind) => write!(fmt, "I/O error: {}", kind),
        }
    }
}

impl ErrorKind {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::Io(io::ErrorKind::NotFound))
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::NotFound,
            other => Self::Io(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_details(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_details(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: msg.into(),
            details: None,
            source: None,
            kind: ErrorKind::None,
        }
    }

    /// Replaces the summary; the previous one is kept as details if there
    /// were none.
    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        let previous = std::mem::replace(&mut self.summary, summary.into());
        if self.details.is_none() && !previous.is_empty() {
            self.details = Some(previous);
        }
        self
    }

    pub fn set_details<M>(mut self, details: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        self.details = Some(details.into());
        self
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, new_val: ErrorKind) -> Self {
        self.kind = new_val;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            if !details.trim().is_empty() {
                write!(f, "\n{}", details)?;
            }
        }
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        if self.kind != ErrorKind::None {
            write!(f, "\nError kind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| &(*(*s)) as _)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        let kind = ErrorKind::from(err.kind());
        Self::new(err.to_string())
            .set_kind(kind)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<rusqlite::Error> for Error {
    #[inline]
    fn from(err: rusqlite::Error) -> Self {
        let kind = if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
            ErrorKind::NotFound
        } else {
            ErrorKind::Index
        };
        Self::new(err.to_string())
            .set_kind(kind)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(err: toml::de::Error) -> Self {
        Self::new(format!("{}", err))
            .set_kind(ErrorKind::Configuration)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<xdg::BaseDirectoriesError> for Error {
    #[inline]
    fn from(err: xdg::BaseDirectoriesError) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Platform)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    #[inline]
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Self::new("Job was cancelled before it produced a result.").set_kind(ErrorKind::Cancelled)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    #[inline]
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::new(err.to_string()).set_kind(ErrorKind::Bug)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(err: &str) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(err: String) -> Self {
        Self::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_summary() {
        let res: Result<()> = Err(Error::new("disk on fire").set_kind(ErrorKind::Index));
        let err = res
            .chain_err_summary(|| "Could not update index")
            .unwrap_err();
        assert_eq!(err.summary, "Could not update index");
        assert_eq!(err.details.as_deref(), Some("disk on fire"));
        assert_eq!(err.kind, ErrorKind::Index);
        let display = err.to_string();
        assert!(display.starts_with("Could not update index\ndisk on fire"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.kind.is_not_found());
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind, ErrorKind::Index);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert_eq!(err.kind, ErrorKind::Io(io::ErrorKind::PermissionDenied));
    }
}
