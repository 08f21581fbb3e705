//
// mailmirror - index documents
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

//! Index schema and document level reads and writes.
//!
//! Stored fields live in the `documents` table, the tokenized text in the
//! `fts` FTS5 table whose `rowid` is the document's `id`. Message bodies are
//! only ever written to `fts` and are never read back.

use rusqlite::{params, Connection, OptionalExtension};

use super::key::{KeyScheme, UniqueId};
use crate::{
    backends::MessageHeaders,
    error::Result,
    utils::{datetime, sqlite3::DatabaseDescription},
};

pub const DB: DatabaseDescription = DatabaseDescription {
    name: "index.db",
    identifier: None,
    application_prefix: crate::conf::APPLICATION_PREFIX,
    directory: None,
    init_script: Some(
        "CREATE TABLE IF NOT EXISTS documents (
                    id               INTEGER PRIMARY KEY,
                    unique_id        TEXT NOT NULL UNIQUE,
                    message_id       TEXT NOT NULL,
                    folder           TEXT NOT NULL,
                    subject          TEXT NOT NULL,
                    _from            TEXT NOT NULL,
                    date             TEXT NOT NULL,
                    subject_sort     TEXT NOT NULL,
                    from_sort        TEXT NOT NULL,
                    date_sort        TEXT NOT NULL
                   );

CREATE INDEX IF NOT EXISTS documents_folder_message_id_index ON documents (folder, message_id);
CREATE INDEX IF NOT EXISTS documents_folder_subject_index ON documents (folder, subject_sort);
CREATE INDEX IF NOT EXISTS documents_folder_from_index ON documents (folder, from_sort);
CREATE INDEX IF NOT EXISTS documents_folder_date_index ON documents (folder, date_sort);

CREATE VIRTUAL TABLE IF NOT EXISTS fts USING fts5(subject, content, _from);",
    ),
    version: 1,
};

/// One live message of one folder, as written to the index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexedDocument {
    pub unique_id: UniqueId,
    pub message_id: String,
    pub folder: String,
    pub subject: String,
    pub from: String,
    /// `yyyyMMddHHmmss`, empty if unknown.
    pub date: String,
    pub content: String,
}

impl IndexedDocument {
    pub fn new(scheme: KeyScheme, folder: &str, headers: &MessageHeaders, content: String) -> Self {
        Self {
            unique_id: UniqueId::new(scheme, folder, &headers.message_id),
            message_id: headers.message_id.clone(),
            folder: folder.to_string(),
            subject: headers.subject.clone(),
            from: headers.from.clone().unwrap_or_default(),
            date: datetime::to_index_date(headers.received),
            content,
        }
    }

    pub fn subject_sort(&self) -> String {
        self.subject.trim().to_lowercase()
    }

    pub fn from_sort(&self) -> String {
        self.from.trim().to_lowercase()
    }

    pub fn date_sort(&self) -> &str {
        &self.date
    }
}

/// What [`put_document`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    Inserted,
    /// The key existed and the entry was replaced.
    Replaced,
    /// The key existed for a different `(folder, message_id)`; the entry was
    /// replaced anyway.
    Collision,
}

/// Whether a document for `(folder, message_id)` is in the index.
///
/// The folder is compared again after the query so only an exact full name
/// match counts.
pub fn document_exists(conn: &Connection, message_id: &str, folder: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT folder FROM documents WHERE message_id = ?1 AND folder = ?2",
    )?;
    let folders = stmt
        .query_map(params![message_id, folder], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(folders.iter().any(|f| f == folder))
}

/// Adds a document, replacing any entry with the same key.
pub fn put_document(conn: &Connection, doc: &IndexedDocument) -> Result<PutOutcome> {
    let existing: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT id, folder, message_id FROM documents WHERE unique_id = ?1",
            params![doc.unique_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (id, outcome) = if let Some((id, folder, message_id)) = existing {
        let outcome = if folder != doc.folder || message_id != doc.message_id {
            log::error!(
                "Unique key collision: key {} is held by {} in {} and was requested for {} in \
                 {}. Replacing the existing entry.",
                doc.unique_id,
                message_id,
                folder,
                doc.message_id,
                doc.folder
            );
            PutOutcome::Collision
        } else {
            PutOutcome::Replaced
        };
        conn.execute(
            "UPDATE documents SET message_id = ?1, folder = ?2, subject = ?3, _from = ?4, date = \
             ?5, subject_sort = ?6, from_sort = ?7, date_sort = ?8 WHERE id = ?9",
            params![
                doc.message_id,
                doc.folder,
                doc.subject,
                doc.from,
                doc.date,
                doc.subject_sort(),
                doc.from_sort(),
                doc.date_sort(),
                id
            ],
        )?;
        conn.execute("DELETE FROM fts WHERE rowid = ?1", params![id])?;
        (id, outcome)
    } else {
        conn.execute(
            "INSERT INTO documents (unique_id, message_id, folder, subject, _from, date, \
             subject_sort, from_sort, date_sort) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                doc.unique_id,
                doc.message_id,
                doc.folder,
                doc.subject,
                doc.from,
                doc.date,
                doc.subject_sort(),
                doc.from_sort(),
                doc.date_sort()
            ],
        )?;
        (conn.last_insert_rowid(), PutOutcome::Inserted)
    };
    conn.execute(
        "INSERT INTO fts (rowid, subject, content, _from) VALUES (?1, ?2, ?3, ?4)",
        params![id, doc.subject, doc.content, doc.from],
    )?;
    Ok(outcome)
}

/// Deletes by key and returns how many documents were removed.
pub fn delete_by_key(conn: &Connection, unique_id: &UniqueId) -> Result<usize> {
    conn.execute(
        "DELETE FROM fts WHERE rowid IN (SELECT id FROM documents WHERE unique_id = ?1)",
        params![unique_id],
    )?;
    Ok(conn.execute(
        "DELETE FROM documents WHERE unique_id = ?1",
        params![unique_id],
    )?)
}

pub fn delete_folder(conn: &Connection, folder: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM fts WHERE rowid IN (SELECT id FROM documents WHERE folder = ?1)",
        params![folder],
    )?;
    Ok(conn.execute("DELETE FROM documents WHERE folder = ?1", params![folder])?)
}

/// `(id, unique_id, message_id)` of every document in `folder`.
pub fn folder_documents(conn: &Connection, folder: &str) -> Result<Vec<(i64, UniqueId, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, unique_id, message_id FROM documents WHERE folder = ?1 ORDER BY id",
    )?;
    let ret = stmt
        .query_map(params![folder], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ret)
}

/// Relabels document `id` as belonging to `folder` under `unique_id`,
/// dropping any other document that held that key.
pub fn relabel(conn: &Connection, id: i64, folder: &str, unique_id: &UniqueId) -> Result<usize> {
    conn.execute(
        "DELETE FROM fts WHERE rowid IN (SELECT id FROM documents WHERE unique_id = ?1 AND id != \
         ?2)",
        params![unique_id, id],
    )?;
    let displaced = conn.execute(
        "DELETE FROM documents WHERE unique_id = ?1 AND id != ?2",
        params![unique_id, id],
    )?;
    conn.execute(
        "UPDATE documents SET folder = ?1, unique_id = ?2 WHERE id = ?3",
        params![folder, unique_id, id],
    )?;
    Ok(displaced)
}
