//
// mailmirror - search index writer
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

//! Search index mutations.
//!
//! Every write to the index goes through the [`Indexer`], a [`JobQueue`]
//! whose single worker owns the [`IndexWriter`]. Callers submit
//! [`IndexTask`]s and get a cancellable [`JoinHandle`] back; the task's
//! [`IndexReport`] can be awaited but usually is not.
//!
//! Each task runs inside one write transaction which is committed when the
//! task returns, whether it succeeded, failed or panicked, so readers opening
//! a new connection observe the task's effect as soon as it completes.

use std::{borrow::Cow, collections::HashSet, sync::Arc};

use rusqlite::{Connection, DropBehavior, Transaction, TransactionBehavior};

pub mod document;
pub mod key;

pub use document::IndexedDocument;
pub use key::{KeyScheme, UniqueId};

use crate::{
    backends::{MessageHandle, RemoteStore, SearchFilter},
    conf::Settings,
    error::{Result, ResultIntoError},
    jobs::{JobContext, JobMetadata, JobQueue, JoinHandle, QueueResource},
};

/// Kind tag of an [`IndexTask`], kept in job descriptions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskKind {
    Index,
    DeIndex,
    FolderIndex,
    FolderDeIndex,
    FolderMove,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Index => write!(fmt, "index"),
            Self::DeIndex => write!(fmt, "de-index"),
            Self::FolderIndex => write!(fmt, "folder index"),
            Self::FolderDeIndex => write!(fmt, "folder de-index"),
            Self::FolderMove => write!(fmt, "folder move"),
        }
    }
}

/// A unit of work for the index writer. Inputs are captured when the task is
/// built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IndexTask {
    IndexMessage(MessageHandle),
    /// Reconciles the index against every live message of a folder.
    FolderIndex(String),
    DeIndexMessage(UniqueId),
    /// Removes every document of exactly this folder.
    FolderDeIndex(String),
    FolderMove { old: String, new: String },
}

impl IndexTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::IndexMessage(_) => TaskKind::Index,
            Self::FolderIndex(_) => TaskKind::FolderIndex,
            Self::DeIndexMessage(_) => TaskKind::DeIndex,
            Self::FolderDeIndex(_) => TaskKind::FolderDeIndex,
            Self::FolderMove { .. } => TaskKind::FolderMove,
        }
    }
}

impl std::fmt::Display for IndexTask {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::IndexMessage(handle) => write!(fmt, "{} {}", self.kind(), handle),
            Self::FolderIndex(folder) | Self::FolderDeIndex(folder) => {
                write!(fmt, "{} {}", self.kind(), folder)
            }
            Self::DeIndexMessage(key) => write!(fmt, "{} {}", self.kind(), key),
            Self::FolderMove { old, new } => write!(fmt, "{} {} -> {}", self.kind(), old, new),
        }
    }
}

/// What a task changed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub removed: usize,
    pub relabeled: usize,
    /// Messages not indexed because they were already present or flagged
    /// deleted.
    pub skipped: usize,
    /// Follow-up tasks submitted.
    pub queued: usize,
    /// Messages that could not be fetched or written.
    pub failed: usize,
}

impl IndexReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.relabeled == 0 && self.queued == 0
    }
}

/// Exclusive owner of the index write connection.
pub struct IndexWriter {
    conn: Connection,
    store: Arc<dyn RemoteStore>,
    key_scheme: KeyScheme,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(IndexWriter))
            .field("store", &self.store)
            .field("key_scheme", &self.key_scheme)
            .finish()
    }
}

impl IndexWriter {
    pub fn new(conn: Connection, store: Arc<dyn RemoteStore>, key_scheme: KeyScheme) -> Self {
        Self {
            conn,
            store,
            key_scheme,
        }
    }

    /// Runs one task inside a write transaction and commits it on the way
    /// out, even if the task failed halfway or panicked.
    pub fn execute(&mut self, task: IndexTask, ctx: &JobContext<Self>) -> Result<IndexReport> {
        let mut tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        // Also applies while unwinding, so the connection never stays inside
        // a transaction.
        tx.set_drop_behavior(DropBehavior::Commit);
        let res = match task {
            IndexTask::IndexMessage(ref handle) => self.index_message(handle),
            IndexTask::FolderIndex(ref folder) => self.folder_index(folder, ctx),
            IndexTask::DeIndexMessage(ref key) => self.de_index_message(key),
            IndexTask::FolderDeIndex(ref folder) => self.folder_de_index(folder),
            IndexTask::FolderMove { ref old, ref new } => self.folder_move(old, new, ctx),
        };
        let flushed = tx.commit();
        let report = res.chain_err_details(|| format!("While running task `{}`", task))?;
        flushed?;
        log::debug!("{}: {:?}", task, report);
        Ok(report)
    }

    /// Commits pending writes so new readers see them.
    fn flush(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn index_message(&self, handle: &MessageHandle) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let headers = self.store.message_headers(handle)?;
        let folder = handle.folder_full_name();
        if headers.flags.is_deleted() {
            log::debug!("Not indexing {}: flagged deleted", handle);
            report.skipped += 1;
            return Ok(report);
        }
        if document::document_exists(&self.conn, &headers.message_id, folder)? {
            log::debug!(
                "Not indexing {}: {} is already indexed",
                handle,
                headers.message_id
            );
            report.skipped += 1;
            return Ok(report);
        }
        let content = self.store.message_text(handle)?;
        let doc = IndexedDocument::new(self.key_scheme, folder, &headers, content);
        document::put_document(&self.conn, &doc)?;
        report.added += 1;
        Ok(report)
    }

    fn folder_index(&self, folder: &str, ctx: &JobContext<Self>) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        // Fetched again so the live set matches the folder as it is now.
        let folder = self.store.folder(folder)?;
        let existing = document::folder_documents(&self.conn, &folder.full_name)?;
        let mut indexed: HashSet<String> = existing.iter().map(|(_, _, mid)| mid.clone()).collect();
        let live = self
            .store
            .list_messages(&folder.full_name, Some(SearchFilter::NotDeleted))?;
        let mut live_ids: HashSet<String> = HashSet::with_capacity(live.len());
        for handle in live {
            ctx.check_canceled()?;
            let headers = match self.store.message_headers(&handle) {
                Ok(headers) => headers,
                Err(err) => {
                    log::error!("Could not fetch headers of {}: {}", handle, err);
                    report.failed += 1;
                    continue;
                }
            };
            live_ids.insert(headers.message_id.clone());
            if indexed.contains(&headers.message_id) {
                continue;
            }
            let added = self.store.message_text(&handle).and_then(|content| {
                let doc = IndexedDocument::new(self.key_scheme, &folder.full_name, &headers, content);
                document::put_document(&self.conn, &doc)
            });
            match added {
                Ok(_) => {
                    indexed.insert(headers.message_id);
                    report.added += 1;
                }
                Err(err) => {
                    log::error!("Could not index {}: {}", handle, err);
                    report.failed += 1;
                }
            }
        }
        if report.failed > 0 {
            // Messages whose headers could not be read are missing from
            // `live_ids`; keep their documents until a clean run.
            log::debug!(
                "Folder {}: {} messages failed, skipping stale entry removal",
                folder.full_name,
                report.failed
            );
        } else {
            for (_, key, message_id) in existing {
                if live_ids.contains(&message_id) {
                    continue;
                }
                ctx.spawn(
                    IndexTask::DeIndexMessage(key.clone()).to_string().into(),
                    move |writer: &mut Self, ctx| writer.execute(IndexTask::DeIndexMessage(key), ctx),
                )?;
                report.queued += 1;
            }
        }
        log::info!(
            "Folder {} indexed: {} added, {} stale, {} failed",
            folder.full_name,
            report.added,
            report.queued,
            report.failed
        );
        Ok(report)
    }

    fn de_index_message(&self, key: &UniqueId) -> Result<IndexReport> {
        let removed = document::delete_by_key(&self.conn, key)?;
        match removed {
            0 => log::debug!("De-index {}: no document with this key", key),
            1 => log::debug!("De-index {}: removed", key),
            n => log::error!(
                "De-index {}: removed {} documents, the unique key collided",
                key,
                n
            ),
        }
        Ok(IndexReport {
            removed,
            ..IndexReport::default()
        })
    }

    fn folder_de_index(&self, folder: &str) -> Result<IndexReport> {
        let removed = document::delete_folder(&self.conn, folder)?;
        log::debug!("Folder {} de-indexed: {} removed", folder, removed);
        Ok(IndexReport {
            removed,
            ..IndexReport::default()
        })
    }

    fn folder_move(&self, old: &str, new: &str, ctx: &JobContext<Self>) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        for (id, _, message_id) in document::folder_documents(&self.conn, old)? {
            ctx.check_canceled()?;
            let key = UniqueId::new(self.key_scheme, new, &message_id);
            report.removed += document::relabel(&self.conn, id, new, &key)?;
            report.relabeled += 1;
        }
        log::info!(
            "Moved {} documents from {} to {}",
            report.relabeled,
            old,
            new
        );
        Ok(report)
    }
}

impl QueueResource for IndexWriter {
    /// Commits, compacts and closes the index.
    fn close(self) -> Result<()> {
        self.flush()?;
        self.conn
            .execute_batch("INSERT INTO fts(fts) VALUES('optimize'); VACUUM;")
            .chain_err_summary(|| "Could not compact search index")?;
        self.conn.close().map_err(|(_, err)| err)?;
        log::debug!("Search index closed");
        Ok(())
    }
}

/// The only way to mutate the search index.
///
/// Cheap to clone; all clones submit to the same queue.
#[derive(Clone, Debug)]
pub struct Indexer {
    queue: Arc<JobQueue<IndexWriter>>,
    key_scheme: KeyScheme,
}

impl Indexer {
    /// Opens (or creates) the index and starts the writer thread.
    ///
    /// Failing to open the index is fatal for the indexer; use
    /// [`MessageSearcher::read_only`](crate::search::MessageSearcher::read_only)
    /// to keep searching an existing index.
    pub fn new(settings: &Settings, store: Arc<dyn RemoteStore>) -> Result<Self> {
        let desc = settings.database(&document::DB)?;
        let conn = desc.open_or_create_db().chain_err_summary(|| {
            format!(
                "Could not open search index for account `{}`",
                settings.account
            )
        })?;
        let writer = IndexWriter::new(conn, store, settings.key_scheme);
        Ok(Self {
            queue: Arc::new(JobQueue::new(
                format!("indexer-{}", settings.account),
                writer,
            )?),
            key_scheme: settings.key_scheme,
        })
    }

    pub fn key_scheme(&self) -> KeyScheme {
        self.key_scheme
    }

    /// Queues `task` and returns immediately.
    pub fn submit(&self, task: IndexTask) -> Result<JoinHandle<IndexReport>> {
        let desc: Cow<'static, str> = task.to_string().into();
        self.queue
            .spawn(desc, move |writer: &mut IndexWriter, ctx| writer.execute(task, ctx))
    }

    pub fn index_message(&self, handle: MessageHandle) -> Result<JoinHandle<IndexReport>> {
        self.submit(IndexTask::IndexMessage(handle))
    }

    pub fn index_folder(&self, folder: &str) -> Result<JoinHandle<IndexReport>> {
        self.submit(IndexTask::FolderIndex(folder.to_string()))
    }

    pub fn de_index_message(
        &self,
        message_id: &str,
        folder: &str,
    ) -> Result<JoinHandle<IndexReport>> {
        self.submit(IndexTask::DeIndexMessage(UniqueId::new(
            self.key_scheme,
            folder,
            message_id,
        )))
    }

    /// De-indexes exactly `folder`, not its descendants.
    pub fn de_index_folder(&self, folder: &str) -> Result<JoinHandle<IndexReport>> {
        self.submit(IndexTask::FolderDeIndex(folder.to_string()))
    }

    pub fn move_folder(&self, old: &str, new: &str) -> Result<JoinHandle<IndexReport>> {
        self.submit(IndexTask::FolderMove {
            old: old.to_string(),
            new: new.to_string(),
        })
    }

    /// Tasks submitted but not completed.
    pub fn pending(&self) -> Vec<JobMetadata> {
        self.queue.jobs()
    }

    pub fn outstanding(&self) -> usize {
        self.queue.outstanding()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.queue.wait_idle()
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Cancels outstanding tasks and closes the index. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.queue.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{
        backends::{Flag, MemoryStore, MessageHeaders},
        error::ErrorKind,
        folder::Folder,
    };

    /// Panics once while fetching a message body.
    #[derive(Debug, Default)]
    struct PanickyStore {
        inner: MemoryStore,
        panic_next: AtomicBool,
    }

    impl RemoteStore for PanickyStore {
        fn separator(&self) -> char {
            self.inner.separator()
        }

        fn list_folders(&self) -> Result<Vec<Folder>> {
            self.inner.list_folders()
        }

        fn folder(&self, full_name: &str) -> Result<Folder> {
            self.inner.folder(full_name)
        }

        fn folder_children(&self, full_name: &str) -> Result<Vec<String>> {
            self.inner.folder_children(full_name)
        }

        fn list_messages(
            &self,
            folder: &str,
            filter: Option<SearchFilter>,
        ) -> Result<Vec<MessageHandle>> {
            self.inner.list_messages(folder, filter)
        }

        fn message_headers(&self, handle: &MessageHandle) -> Result<MessageHeaders> {
            self.inner.message_headers(handle)
        }

        fn message_text(&self, handle: &MessageHandle) -> Result<String> {
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("message body of {} is unreadable", handle);
            }
            self.inner.message_text(handle)
        }

        fn create_folder(&self, full_name: &str) -> Result<Folder> {
            self.inner.create_folder(full_name)
        }

        fn delete_folder(&self, full_name: &str) -> Result<()> {
            self.inner.delete_folder(full_name)
        }

        fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<Folder> {
            self.inner.rename_folder(old_name, new_name)
        }
    }

    fn headers(message_id: &str, flags: Flag) -> MessageHeaders {
        MessageHeaders {
            message_id: message_id.to_string(),
            from: Some("carol@example.com".to_string()),
            subject: format!("about {}", message_id),
            received: Some(1_600_000_000),
            flags,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<MemoryStore>, Indexer) {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        store.create_folder("INBOX").unwrap();
        let settings = Settings::with_data_dir("test", tmp_dir.path());
        let indexer = Indexer::new(&settings, store.clone()).unwrap();
        (tmp_dir, store, indexer)
    }

    #[test]
    fn test_index_task_display() {
        let task = IndexTask::FolderMove {
            old: "A".to_string(),
            new: "B".to_string(),
        };
        assert_eq!(task.kind(), TaskKind::FolderMove);
        assert_eq!(task.to_string(), "folder move A -> B");
        assert!(IndexReport::default().is_noop());
    }

    #[test]
    fn test_index_message_skips_deleted_and_duplicates() {
        let (_tmp_dir, store, indexer) = setup();
        let live = store.append("INBOX", headers("<a@x>", Flag::SEEN), "a").unwrap();
        let deleted = store
            .append("INBOX", headers("<b@x>", Flag::DELETED), "b")
            .unwrap();
        let first = indexer.index_message(live.clone()).unwrap().wait().unwrap();
        assert_eq!(first.added, 1);
        let second = indexer.index_message(live).unwrap().wait().unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 1);
        let third = indexer.index_message(deleted).unwrap().wait().unwrap();
        assert_eq!(third.skipped, 1);
        indexer.shutdown().unwrap();
    }

    #[test]
    fn test_index_failure_is_reported_and_queue_continues() {
        let (_tmp_dir, store, indexer) = setup();
        let handle = store.append("INBOX", headers("<a@x>", Flag::SEEN), "a").unwrap();
        store.set_failing("INBOX", true).unwrap();
        let err = indexer
            .index_message(handle.clone())
            .unwrap()
            .wait()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::External);
        store.set_failing("INBOX", false).unwrap();
        let report = indexer.index_message(handle).unwrap().wait().unwrap();
        assert_eq!(report.added, 1);
        indexer.shutdown().unwrap();
    }

    #[test]
    fn test_index_panicking_task_leaves_writer_usable() {
        let tmp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(PanickyStore::default());
        store.create_folder("INBOX").unwrap();
        let settings = Settings::with_data_dir("test", tmp_dir.path());
        let indexer = Indexer::new(&settings, store.clone()).unwrap();
        let first = store
            .inner
            .append("INBOX", headers("<a@x>", Flag::SEEN), "a")
            .unwrap();
        let second = store
            .inner
            .append("INBOX", headers("<b@x>", Flag::SEEN), "b")
            .unwrap();

        store.panic_next.store(true, Ordering::SeqCst);
        let err = indexer
            .index_message(first.clone())
            .unwrap()
            .wait()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Bug);
        assert_eq!(
            indexer.index_message(second).unwrap().wait().unwrap().added,
            1
        );
        assert_eq!(
            indexer.index_message(first).unwrap().wait().unwrap().added,
            1
        );
        let report = indexer.index_folder("INBOX").unwrap().wait().unwrap();
        assert!(report.is_noop());
        indexer.shutdown().unwrap();
    }

    #[test]
    fn test_index_de_index_message() {
        let (_tmp_dir, store, indexer) = setup();
        let handle = store.append("INBOX", headers("<a@x>", Flag::SEEN), "a").unwrap();
        indexer.index_message(handle).unwrap().wait().unwrap();
        let removed = indexer
            .de_index_message("<a@x>", "INBOX")
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(removed.removed, 1);
        let again = indexer
            .de_index_message("<a@x>", "INBOX")
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(again.removed, 0);
        indexer.shutdown().unwrap();
        indexer.shutdown().unwrap();
        assert!(indexer.is_shut_down());
        assert_eq!(
            indexer.index_folder("INBOX").unwrap_err().kind,
            ErrorKind::Cancelled
        );
    }
}
