//
// mailmirror - message searcher
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

//! Read side of the search index.
//!
//! [`MessageSearcher`] keeps no connection around: every query opens its own
//! short lived read-only connection, so it observes whatever the last
//! completed index task committed and never blocks the writer.
//!
//! Pagination is applied to the full result of each call. Two calls for
//! consecutive pages may overlap or skip a message if the index changed in
//! between.

use rusqlite::{params_from_iter, types::Value, Connection};

pub mod query;

pub use query::{SearchFields, TextQuery};

use crate::{
    conf::Settings,
    error::{Error, ErrorKind, Result, ResultIntoError},
    index::{
        document::{self, DB},
        UniqueId,
    },
    utils::{
        datetime::{self, UnixTimestamp},
        sqlite3::DatabaseDescription,
        SortField, SortOrder,
    },
};

/// Sender shown for messages without a `From` header.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// A lightweight message record built from stored index fields. The body is
/// never part of it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Message {
    pub unique_id: UniqueId,
    pub message_id: String,
    pub folder: String,
    pub sender: String,
    pub subject: String,
    pub received: Option<UnixTimestamp>,
}

/// Stored fields of one index document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredDocument {
    pub unique_id: UniqueId,
    pub message_id: String,
    pub folder: String,
    pub subject: String,
    pub from: String,
    pub date: String,
}

impl StoredDocument {
    const COLUMNS: &'static str = "d.unique_id, d.message_id, d.folder, d.subject, d._from, d.date";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            unique_id: row.get(0)?,
            message_id: row.get(1)?,
            folder: row.get(2)?,
            subject: row.get(3)?,
            from: row.get(4)?,
            date: row.get(5)?,
        })
    }
}

/// `[start, end)` range over a result list, 0-based. `end: None` means up to
/// the last result.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Page {
    pub start: usize,
    pub end: Option<usize>,
}

impl Page {
    pub const ALL: Self = Self {
        start: 0,
        end: None,
    };

    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn from_bounds(start: Option<usize>, end: Option<usize>) -> Self {
        Self {
            start: start.unwrap_or(0),
            end,
        }
    }

    pub fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        let len = match self.end {
            Some(end) => end.saturating_sub(self.start),
            None => usize::MAX,
        };
        items.into_iter().skip(self.start).take(len).collect()
    }
}

/// Criteria of [`MessageSearcher::search`]. The folder restriction and the
/// text clause are combined with AND; the text is matched against any of
/// `fields`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SearchConditions {
    pub folder: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub fields: SearchFields,
    pub sort: Option<SortField>,
    #[serde(default)]
    pub order: SortOrder,
}

impl SearchConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn matching<S: Into<String>>(mut self, text: S) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn fields(mut self, fields: SearchFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn sorted_by(mut self, sort: SortField, order: SortOrder) -> Self {
        self.sort = Some(sort);
        self.order = order;
        self
    }

    fn text_query(&self) -> Result<Option<String>> {
        match self.text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => Ok(Some(TextQuery::parse(text)?.to_fts(self.fields)?)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MessageSearcher {
    db: DatabaseDescription,
    read_only: bool,
}

impl MessageSearcher {
    /// Searcher over the session's index, creating an empty index if there
    /// is none yet.
    pub fn new(settings: &Settings) -> Result<Self> {
        let db = settings.database(&DB)?;
        db.open_or_create_db()?;
        Ok(Self {
            db,
            read_only: false,
        })
    }

    /// Degraded searcher over an existing index, for when the index cannot
    /// be opened for writing. Fails with [`ErrorKind::NotFound`] if there is
    /// no index to search.
    pub fn read_only(settings: &Settings) -> Result<Self> {
        let db = settings.database(&DB)?;
        if !db.exists()? {
            return Err(Error::new(format!(
                "There is no search index for account `{}` to open read-only.",
                settings.account
            ))
            .set_kind(ErrorKind::NotFound));
        }
        log::info!(
            "Opening search index of account `{}` read-only; indexing is disabled",
            settings.account
        );
        Ok(Self {
            db,
            read_only: true,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn connection(&self) -> Result<Connection> {
        self.db
            .open_read_only()
            .chain_err_summary(|| "Could not open search index for reading")
    }

    /// Whether `(folder, message_id)` is indexed.
    pub fn exists(&self, message_id: &str, folder: &str) -> Result<bool> {
        let conn = self.connection()?;
        document::document_exists(&conn, message_id, folder)
    }

    pub fn count_in_folder(&self, folder: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE folder = ?1",
            [folder],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Message identifiers of every document in `folder`.
    pub fn message_ids_in_folder(&self, folder: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        Ok(document::folder_documents(&conn, folder)?
            .into_iter()
            .map(|(_, _, mid)| mid)
            .collect())
    }

    /// Every message of `folder`, in indexing order.
    pub fn list_in_folder(&self, folder: &str) -> Result<Vec<Message>> {
        self.search_page(&SearchConditions::new().in_folder(folder), Page::ALL)
    }

    /// Messages `[start, end)` of `folder`, in indexing order.
    pub fn list_in_folder_range(&self, folder: &str, start: usize, end: usize) -> Result<Vec<Message>> {
        self.search_page(
            &SearchConditions::new().in_folder(folder),
            Page::new(start, end),
        )
    }

    pub fn list_in_folder_sorted(
        &self,
        folder: &str,
        sort: SortField,
        order: SortOrder,
        page: Page,
    ) -> Result<Vec<Message>> {
        self.search_page(
            &SearchConditions::new()
                .in_folder(folder)
                .sorted_by(sort, order),
            page,
        )
    }

    pub fn search(&self, conditions: &SearchConditions) -> Result<Vec<Message>> {
        self.search_page(conditions, Page::ALL)
    }

    pub fn search_page(&self, conditions: &SearchConditions, page: Page) -> Result<Vec<Message>> {
        let text = conditions.text_query()?;
        let mut sql = format!("SELECT {} FROM ", StoredDocument::COLUMNS);
        let mut clauses: Vec<&str> = vec![];
        let mut args: Vec<Value> = vec![];
        let has_text = text.is_some();
        if let Some(text) = text {
            sql.push_str("fts JOIN documents d ON d.id = fts.rowid");
            clauses.push("fts MATCH ?");
            args.push(Value::Text(text));
        } else {
            sql.push_str("documents d");
        }
        if let Some(folder) = conditions.folder.as_ref() {
            clauses.push("d.folder = ?");
            args.push(Value::Text(folder.clone()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match conditions.sort {
            Some(sort) => {
                sql.push_str(&format!(
                    " ORDER BY d.{} {}, d.id ASC",
                    sort.column(),
                    conditions.order.as_sql()
                ));
            }
            None if has_text => {
                sql.push_str(" ORDER BY rank, d.id ASC");
            }
            None => sql.push_str(" ORDER BY d.id ASC"),
        }
        log::trace!("search: {} {:?}", sql, args);

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(args.iter()), StoredDocument::from_row)?
            .collect::<rusqlite::Result<Vec<StoredDocument>>>()
            .chain_err_summary(|| "Could not read search results")?;
        let docs: Vec<StoredDocument> = docs
            .into_iter()
            .filter(|d| {
                conditions
                    .folder
                    .as_ref()
                    .map_or(true, |folder| &d.folder == folder)
            })
            .collect();
        Ok(page.apply(docs).into_iter().map(Self::to_message).collect())
    }

    /// Builds a [`Message`] from stored fields only.
    pub fn to_message(doc: StoredDocument) -> Message {
        Message {
            unique_id: doc.unique_id,
            message_id: doc.message_id,
            folder: doc.folder,
            sender: if doc.from.trim().is_empty() {
                UNKNOWN_SENDER.to_string()
            } else {
                doc.from
            },
            subject: doc.subject,
            received: datetime::from_index_date(&doc.date),
        }
    }
}
