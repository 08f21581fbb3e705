//
// mailmirror - configuration
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

//! Session settings.
//!
//! Settings are read once, usually from a TOML file, and handed to the
//! constructors of [`Indexer`](crate::index::Indexer),
//! [`MessageSearcher`](crate::search::MessageSearcher) and
//! [`FolderSynchronizer`](crate::sync::FolderSynchronizer).
//!
//! ```toml
//! account = "alice"
//! data_dir = "/var/lib/webmail/alice"
//! key_scheme = "uuid"
//! default_sort = "date"
//! inbox = "INBOX"
//! separator = "/"
//!
//! [log]
//! level = "DEBUG"
//! ```

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::{Error, ErrorKind, Result, ResultIntoError},
    index::key::KeyScheme,
    utils::{logging::LogLevel, sqlite3::DatabaseDescription, SortField},
};

/// Prefix used for the `XDG` data directory when `data_dir` is not set.
pub const APPLICATION_PREFIX: &str = "mailmirror";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Names the session; database files are prefixed with it.
    #[serde(default = "default_account")]
    pub account: String,
    /// Directory holding the search index and the local cache. Defaults to
    /// the `XDG` data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub key_scheme: KeyScheme,
    #[serde(default)]
    pub default_sort: SortField,
    /// Full name of the distinguished inbox folder.
    #[serde(default = "default_inbox")]
    pub inbox: String,
    /// Hierarchy separator of folder full names.
    #[serde(default = "default_separator")]
    pub separator: char,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,
    /// Append log lines to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_account() -> String {
    "default".to_string()
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

const fn default_separator() -> char {
    '/'
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account: default_account(),
            data_dir: None,
            key_scheme: KeyScheme::default(),
            default_sort: SortField::default(),
            inbox: default_inbox(),
            separator: default_separator(),
            log: LogSettings::default(),
        }
    }
}

impl FromStr for Settings {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ret: Self = toml::from_str(s).chain_err_summary(|| "Could not parse settings")?;
        ret.validate()?;
        Ok(ret)
    }
}

impl Settings {
    /// Settings keeping every database inside `data_dir`.
    pub fn with_data_dir<P: Into<PathBuf>>(account: &str, data_dir: P) -> Self {
        Self {
            account: account.to_string(),
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).chain_err_summary(|| {
            format!("Could not read settings file {}", path.display())
        })?;
        contents
            .parse::<Self>()
            .chain_err_details(|| format!("In settings file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            return Err(Error::new("`account` must not be empty.").set_kind(ErrorKind::Configuration));
        }
        if self.account.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::new(format!(
                "`account` must not contain a path separator, got `{}`.",
                self.account
            ))
            .set_kind(ErrorKind::Configuration));
        }
        if self.inbox.is_empty() {
            return Err(Error::new("`inbox` must not be empty.").set_kind(ErrorKind::Configuration));
        }
        if self.separator.is_whitespace() || self.inbox.contains(self.separator) {
            return Err(Error::new(format!(
                "`separator` {:?} is not usable with inbox `{}`.",
                self.separator, self.inbox
            ))
            .set_kind(ErrorKind::Configuration));
        }
        if let Some(dir) = self.data_dir.as_deref() {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::new(format!(
                    "`data_dir` {} is not a directory.",
                    dir.display()
                ))
                .set_kind(ErrorKind::Configuration));
            }
        }
        Ok(())
    }

    /// Fills in the session specific parts of a database description.
    pub(crate) fn database(&self, desc: &DatabaseDescription) -> Result<DatabaseDescription> {
        if let Some(dir) = self.data_dir.as_deref() {
            std::fs::create_dir_all(dir).chain_err_summary(|| {
                format!("Could not create data directory {}", dir.display())
            })?;
        }
        Ok(DatabaseDescription {
            identifier: Some(Cow::Owned(self.account.clone())),
            application_prefix: APPLICATION_PREFIX,
            directory: self.data_dir.clone().map(Cow::Owned),
            ..desc.clone()
        })
    }

    pub fn is_inbox(&self, folder: &str) -> bool {
        folder == self.inbox
    }
}
