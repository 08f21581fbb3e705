//
// mailmirror - local message cache
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

use std::collections::BTreeSet;

use crate::{
    backends::{Flag, MessageHeaders, SearchFilter},
    conf::Settings,
    error::{Result, ResultIntoError},
    folder::FolderCounts,
    utils::sqlite3::{self, Connection, DatabaseDescription},
};

/// A message as kept in the local cache.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CachedMessage {
    pub headers: MessageHeaders,
    pub text: String,
}

/// Local mirror of remote folders.
///
/// Implementations are owned by the synchronizer's worker and are never
/// shared between threads.
pub trait LocalCache: Send + std::fmt::Debug {
    fn reset(&mut self) -> Result<()>;

    fn folders(&mut self) -> Result<Vec<String>>;

    /// Creates the folder if it does not exist.
    fn create_folder(&mut self, full_name: &str) -> Result<()>;

    /// Deletes a folder, its descendants and all their messages.
    fn delete_folder(&mut self, full_name: &str) -> Result<()>;

    /// Renames a folder and its descendants.
    fn rename_folder(&mut self, old_name: &str, new_name: &str) -> Result<()>;

    fn counts(&mut self, folder: &str) -> Result<FolderCounts>;

    /// Message identifiers of `folder` matching `filter`.
    fn message_ids(&mut self, folder: &str, filter: Option<SearchFilter>) -> Result<BTreeSet<String>>;

    fn find(&mut self, folder: &str, message_id: &str) -> Result<Option<CachedMessage>>;

    /// Inserts a message, replacing the cached copy with the same message
    /// identifier.
    fn append(&mut self, folder: &str, message: &CachedMessage) -> Result<()>;

    fn flag_deleted(&mut self, folder: &str, message_ids: &[String]) -> Result<usize>;

    /// Removes messages flagged deleted and returns how many were removed.
    fn expunge(&mut self, folder: &str) -> Result<usize>;

    fn close(self: Box<Self>) -> Result<()>;
}

const DB_DESCRIPTION: DatabaseDescription = DatabaseDescription {
    name: "cache.db",
    identifier: None,
    application_prefix: crate::conf::APPLICATION_PREFIX,
    directory: None,
    init_script: Some(
        "PRAGMA encoding = 'UTF-8';

    CREATE TABLE IF NOT EXISTS folders (
                    full_name        TEXT NOT NULL PRIMARY KEY
                   );
    CREATE TABLE IF NOT EXISTS messages (
                    folder           TEXT NOT NULL,
                    message_id       TEXT NOT NULL,
                    flags            INTEGER NOT NULL,
                    _from            TEXT,
                    subject          TEXT NOT NULL,
                    received         INTEGER,
                    body             TEXT NOT NULL,
                    PRIMARY KEY (folder, message_id)
                   );
    CREATE INDEX IF NOT EXISTS messages_folder_idx ON messages(folder);",
    ),
    version: 1,
};

#[derive(Debug)]
pub struct Sqlite3Cache {
    connection: Connection,
    db: DatabaseDescription,
    separator: char,
}

impl Sqlite3Cache {
    pub fn open(settings: &Settings) -> Result<Self> {
        let db = settings.database(&DB_DESCRIPTION)?;
        let connection = match db.open_or_create_db() {
            Ok(c) => Ok(c),
            Err(err) => {
                // The cache only mirrors the remote store, so retry once from
                // an empty database.
                log::error!("Could not open local cache, resetting it: {}", err);
                if db.reset_db().is_ok() {
                    db.open_or_create_db()
                } else {
                    Err(err)
                }
            }
        }
        .chain_err_summary(|| {
            format!("Could not open local cache of account `{}`", settings.account)
        })?;
        Ok(Self {
            connection,
            db,
            separator: settings.separator,
        })
    }

    fn subtree_prefix(&self, full_name: &str) -> String {
        format!("{}{}", full_name, self.separator)
    }
}

impl LocalCache for Sqlite3Cache {
    fn reset(&mut self) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM folders", [])?;
        tx.commit()?;
        Ok(())
    }

    fn folders(&mut self) -> Result<Vec<String>> {
        let mut stmt = self
            .connection
            .prepare("SELECT full_name FROM folders ORDER BY full_name")?;
        let ret = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(ret)
    }

    fn create_folder(&mut self, full_name: &str) -> Result<()> {
        self.connection.execute(
            "INSERT OR IGNORE INTO folders (full_name) VALUES (?1)",
            sqlite3::params![full_name],
        )?;
        Ok(())
    }

    fn delete_folder(&mut self, full_name: &str) -> Result<()> {
        let prefix = self.subtree_prefix(full_name);
        let tx = self.connection.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE folder = ?1 OR substr(folder, 1, length(?2)) = ?2",
            sqlite3::params![full_name, prefix],
        )?;
        tx.execute(
            "DELETE FROM folders WHERE full_name = ?1 OR substr(full_name, 1, length(?2)) = ?2",
            sqlite3::params![full_name, prefix],
        )
        .chain_err_summary(|| format!("Could not delete cached folder {}", full_name))?;
        tx.commit()?;
        Ok(())
    }

    fn rename_folder(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let prefix = self.subtree_prefix(old_name);
        let tx = self.connection.transaction()?;
        tx.execute(
            "UPDATE messages SET folder = ?3 || substr(folder, length(?1) + 1) WHERE folder = ?1 \
             OR substr(folder, 1, length(?2)) = ?2",
            sqlite3::params![old_name, prefix, new_name],
        )?;
        tx.execute(
            "UPDATE folders SET full_name = ?3 || substr(full_name, length(?1) + 1) WHERE \
             full_name = ?1 OR substr(full_name, 1, length(?2)) = ?2",
            sqlite3::params![old_name, prefix, new_name],
        )
        .chain_err_summary(|| {
            format!("Could not rename cached folder {} to {}", old_name, new_name)
        })?;
        tx.commit()?;
        Ok(())
    }

    fn counts(&mut self, folder: &str) -> Result<FolderCounts> {
        let mut counts = FolderCounts::default();
        let mut stmt = self
            .connection
            .prepare_cached("SELECT flags FROM messages WHERE folder = ?1")?;
        let flags = stmt.query_map(sqlite3::params![folder], |row| row.get::<_, u8>(0))?;
        for flags in flags {
            let flags = Flag::from_bits_truncate(flags?);
            counts.total += 1;
            if SearchFilter::New.matches(flags) {
                counts.new += 1;
            }
            if SearchFilter::Unread.matches(flags) {
                counts.unread += 1;
            }
            if flags.is_deleted() {
                counts.deleted += 1;
            }
        }
        Ok(counts)
    }

    fn message_ids(&mut self, folder: &str, filter: Option<SearchFilter>) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .connection
            .prepare_cached("SELECT message_id, flags FROM messages WHERE folder = ?1")?;
        let rows = stmt.query_map(sqlite3::params![folder], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u8>(1)?))
        })?;
        let mut ret = BTreeSet::new();
        for row in rows {
            let (message_id, flags) = row?;
            if filter.map_or(true, |f| f.matches(Flag::from_bits_truncate(flags))) {
                ret.insert(message_id);
            }
        }
        Ok(ret)
    }

    fn find(&mut self, folder: &str, message_id: &str) -> Result<Option<CachedMessage>> {
        let mut stmt = self.connection.prepare_cached(
            "SELECT flags, _from, subject, received, body FROM messages WHERE folder = ?1 AND \
             message_id = ?2",
        )?;
        let mut rows = stmt.query_map(sqlite3::params![folder, message_id], |row| {
            Ok(CachedMessage {
                headers: MessageHeaders {
                    message_id: message_id.to_string(),
                    flags: Flag::from_bits_truncate(row.get(0)?),
                    from: row.get(1)?,
                    subject: row.get(2)?,
                    received: row.get(3)?,
                },
                text: row.get(4)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    fn append(&mut self, folder: &str, message: &CachedMessage) -> Result<()> {
        let headers = &message.headers;
        self.connection
            .execute(
                "INSERT OR REPLACE INTO messages (folder, message_id, flags, _from, subject, \
                 received, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                sqlite3::params![
                    folder,
                    headers.message_id,
                    headers.flags.bits(),
                    headers.from,
                    headers.subject,
                    headers.received,
                    message.text
                ],
            )
            .chain_err_summary(|| {
                format!(
                    "Could not cache message {} of folder {}",
                    headers.message_id, folder
                )
            })?;
        Ok(())
    }

    fn flag_deleted(&mut self, folder: &str, message_ids: &[String]) -> Result<usize> {
        let tx = self.connection.transaction()?;
        let mut ret = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET flags = flags | ?1 WHERE folder = ?2 AND message_id = ?3",
            )?;
            for message_id in message_ids {
                ret += stmt.execute(sqlite3::params![Flag::DELETED.bits(), folder, message_id])?;
            }
        }
        tx.commit()?;
        Ok(ret)
    }

    fn expunge(&mut self, folder: &str) -> Result<usize> {
        Ok(self.connection.execute(
            "DELETE FROM messages WHERE folder = ?1 AND (flags & ?2) != 0",
            sqlite3::params![folder, Flag::DELETED.bits()],
        )?)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { connection, db, .. } = *self;
        connection.close().map_err(|(_, err)| err)?;
        log::trace!("Local cache {} closed", db.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_id: &str, flags: Flag) -> CachedMessage {
        CachedMessage {
            headers: MessageHeaders {
                message_id: message_id.to_string(),
                from: Some("gina@example.com".to_string()),
                subject: "hello".to_string(),
                received: Some(1_000),
                flags,
            },
            text: format!("body of {}", message_id),
        }
    }

    #[test]
    fn test_cache_append_flag_expunge() {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::with_data_dir("test", tmp_dir.path());
        let mut cache = Sqlite3Cache::open(&settings).unwrap();
        cache.create_folder("INBOX").unwrap();
        cache.create_folder("INBOX").unwrap();
        cache.append("INBOX", &message("<a@x>", Flag::RECENT)).unwrap();
        cache.append("INBOX", &message("<b@x>", Flag::SEEN)).unwrap();
        cache.append("INBOX", &message("<b@x>", Flag::SEEN | Flag::FLAGGED)).unwrap();
        assert_eq!(
            cache.counts("INBOX").unwrap(),
            FolderCounts {
                total: 2,
                new: 1,
                unread: 1,
                deleted: 0
            }
        );
        assert_eq!(
            cache.find("INBOX", "<b@x>").unwrap().unwrap(),
            message("<b@x>", Flag::SEEN | Flag::FLAGGED)
        );
        assert_eq!(
            cache
                .message_ids("INBOX", Some(SearchFilter::Unread))
                .unwrap()
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["<a@x>".to_string()]
        );
        assert_eq!(cache.flag_deleted("INBOX", &["<a@x>".to_string()]).unwrap(), 1);
        assert_eq!(cache.counts("INBOX").unwrap().deleted, 1);
        assert!(!cache
            .message_ids("INBOX", Some(SearchFilter::NotDeleted))
            .unwrap()
            .contains("<a@x>"));
        assert_eq!(cache.expunge("INBOX").unwrap(), 1);
        assert_eq!(cache.counts("INBOX").unwrap().total, 1);
        assert_eq!(cache.find("INBOX", "<a@x>").unwrap(), None);
        Box::new(cache).close().unwrap();
    }

    #[test]
    fn test_cache_folder_subtree_operations() {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::with_data_dir("test", tmp_dir.path());
        let mut cache = Sqlite3Cache::open(&settings).unwrap();
        for folder in ["Work", "Work/A", "Workshop"] {
            cache.create_folder(folder).unwrap();
            cache.append(folder, &message("<m@x>", Flag::SEEN)).unwrap();
        }
        cache.rename_folder("Work", "Job").unwrap();
        assert_eq!(
            cache.folders().unwrap(),
            vec!["Job".to_string(), "Job/A".to_string(), "Workshop".to_string()]
        );
        assert_eq!(cache.counts("Job/A").unwrap().total, 1);
        assert_eq!(cache.counts("Work/A").unwrap().total, 0);
        cache.delete_folder("Job").unwrap();
        assert_eq!(cache.folders().unwrap(), vec!["Workshop".to_string()]);
        assert_eq!(cache.counts("Workshop").unwrap().total, 1);
        cache.reset().unwrap();
        assert!(cache.folders().unwrap().is_empty());
    }
}
