//
// mailmirror - folder synchronization
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

//! Reconciliation of the local cache against remote folders.
//!
//! Like the [`Indexer`], the [`FolderSynchronizer`] is a single worker
//! queue; it owns the [`LocalCache`] and is the only writer to it.
//!
//! The inbox is always synchronized in full. Other folders are compared by
//! counts first, and only the message sets whose counts differ are fetched:
//!
//! 1. new messages, if the remote and local new counts differ,
//! 2. unread messages, if the unread counts differ,
//! 3. live messages, if the total minus deleted counts differ.
//!
//! The last comparison is made after the first two syncs ran, so a message
//! dropped by a flag-only change (read elsewhere, for example) is brought
//! back in the same run.
//!
//! Changes to the cache are forwarded to the index: messages added are
//! indexed and messages removed are de-indexed.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

pub mod cache;

pub use cache::{CachedMessage, LocalCache, Sqlite3Cache};

use crate::{
    backends::{MessageHandle, RemoteStore, SearchFilter},
    conf::Settings,
    error::{Result, ResultIntoError},
    folder::FolderCounts,
    index::Indexer,
    jobs::{JobContext, JobQueue, JoinHandle, QueueResource},
};

/// Outcome of one reconciliation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SyncReport {
    pub folder: String,
    /// Message sets that were fetched, in order.
    pub filters: Vec<SearchFilter>,
    /// Message identifiers new to the cache.
    pub added: BTreeSet<String>,
    /// Message identifiers no longer in the cache.
    pub removed: BTreeSet<String>,
    /// Messages dropped by one partial sync and fetched again by a later one.
    pub restored: BTreeSet<String>,
    /// Cached messages whose flags were refreshed.
    pub updated: usize,
    /// Messages that could not be fetched.
    pub failed: usize,
}

impl SyncReport {
    fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restored.is_empty()
    }
}

/// Exclusive owner of the local cache.
#[derive(Debug)]
pub struct CacheWorker {
    cache: Box<dyn LocalCache>,
    store: Arc<dyn RemoteStore>,
    indexer: Option<Indexer>,
    inbox: String,
}

impl CacheWorker {
    fn reconcile(&mut self, folder: &str, ctx: &JobContext<Self>) -> Result<SyncReport> {
        let remote = self.store.folder(folder)?;
        self.cache.create_folder(folder)?;
        let mut report = SyncReport::new(folder);
        let mut handles = BTreeMap::new();
        if folder == self.inbox {
            self.partial_sync(folder, SearchFilter::NotDeleted, &mut report, &mut handles, ctx)?;
        } else {
            let local = self.cache.counts(folder)?;
            log::trace!(
                "Folder {}: remote counts {:?}, local counts {:?}",
                folder,
                remote.counts,
                local
            );
            if remote.counts.new != local.new {
                self.partial_sync(folder, SearchFilter::New, &mut report, &mut handles, ctx)?;
            }
            if remote.counts.unread != local.unread {
                self.partial_sync(folder, SearchFilter::Unread, &mut report, &mut handles, ctx)?;
            }
            let local: FolderCounts = self.cache.counts(folder)?;
            if remote.counts.live() != local.live() {
                self.partial_sync(
                    folder,
                    SearchFilter::NotDeleted,
                    &mut report,
                    &mut handles,
                    ctx,
                )?;
            }
        }
        self.forward_to_index(&report, handles);
        if report.is_noop() {
            log::debug!("Folder {} is up to date", folder);
        } else {
            log::info!(
                "Folder {} synchronized: {} added, {} removed, {} restored, {} failed",
                folder,
                report.added.len(),
                report.removed.len(),
                report.restored.len(),
                report.failed
            );
        }
        Ok(report)
    }

    /// Makes the cached messages of `folder` matching `filter` equal to the
    /// remote ones.
    fn partial_sync(
        &mut self,
        folder: &str,
        filter: SearchFilter,
        report: &mut SyncReport,
        handles: &mut BTreeMap<String, MessageHandle>,
        ctx: &JobContext<Self>,
    ) -> Result<()> {
        report.filters.push(filter);
        let mut remote = BTreeMap::new();
        let mut failed = 0;
        for handle in self.store.list_messages(folder, Some(filter))? {
            ctx.check_canceled()?;
            match self.store.message_headers(&handle) {
                Ok(headers) => {
                    remote.insert(headers.message_id.clone(), (handle, headers));
                }
                Err(err) => {
                    log::error!("Could not fetch headers of {}: {}", handle, err);
                    failed += 1;
                }
            }
        }
        let local = self.cache.message_ids(folder, Some(filter))?;
        let gone: Vec<String> = local
            .iter()
            .filter(|mid| !remote.contains_key(*mid))
            .cloned()
            .collect();

        for (message_id, (handle, headers)) in remote {
            if local.contains(&message_id) {
                continue;
            }
            ctx.check_canceled()?;
            if let Some(cached) = self.cache.find(folder, &message_id)? {
                // Only its flags moved it into this set.
                self.cache.append(
                    folder,
                    &CachedMessage {
                        headers,
                        text: cached.text,
                    },
                )?;
                report.updated += 1;
                continue;
            }
            let text = match self.store.message_text(&handle) {
                Ok(text) => text,
                Err(err) => {
                    log::error!("Could not fetch {}: {}", handle, err);
                    failed += 1;
                    continue;
                }
            };
            self.cache.append(folder, &CachedMessage { headers, text })?;
            if report.removed.remove(&message_id) {
                report.restored.insert(message_id);
            } else {
                report.added.insert(message_id.clone());
                handles.insert(message_id, handle);
            }
        }

        if failed > 0 {
            // Unreadable messages look absent from the remote set.
            log::debug!(
                "Folder {} ({}): {} messages failed, not removing any",
                folder,
                filter,
                failed
            );
            report.failed += failed;
            return Ok(());
        }
        if gone.is_empty() {
            return Ok(());
        }
        self.cache
            .flag_deleted(folder, &gone)
            .chain_err_summary(|| format!("Could not update cached folder {}", folder))?;
        self.cache.expunge(folder)?;
        for message_id in gone {
            if !report.added.remove(&message_id) {
                report.removed.insert(message_id);
            }
        }
        Ok(())
    }

    fn forward_to_index(&self, report: &SyncReport, mut handles: BTreeMap<String, MessageHandle>) {
        let Some(indexer) = self.indexer.as_ref() else {
            return;
        };
        for message_id in &report.added {
            let Some(handle) = handles.remove(message_id) else {
                continue;
            };
            if let Err(err) = indexer.index_message(handle) {
                log::debug!("Not indexing {}: {}", message_id, err);
            }
        }
        for message_id in &report.removed {
            if let Err(err) = indexer.de_index_message(message_id, &report.folder) {
                log::debug!("Not de-indexing {}: {}", message_id, err);
            }
        }
    }
}

impl QueueResource for CacheWorker {
    fn close(self) -> Result<()> {
        self.cache.close()
    }
}

/// Reconciles the local cache against the remote store, one folder at a
/// time, on a dedicated worker.
#[derive(Clone, Debug)]
pub struct FolderSynchronizer {
    queue: Arc<JobQueue<CacheWorker>>,
}

impl FolderSynchronizer {
    /// Opens the local cache of `settings`. Cache changes are forwarded to
    /// `indexer` when there is one.
    pub fn new(
        settings: &Settings,
        store: Arc<dyn RemoteStore>,
        indexer: Option<Indexer>,
    ) -> Result<Self> {
        let cache = Sqlite3Cache::open(settings)?;
        Self::with_cache(settings, Box::new(cache), store, indexer)
    }

    pub fn with_cache(
        settings: &Settings,
        cache: Box<dyn LocalCache>,
        store: Arc<dyn RemoteStore>,
        indexer: Option<Indexer>,
    ) -> Result<Self> {
        let worker = CacheWorker {
            cache,
            store,
            indexer,
            inbox: settings.inbox.clone(),
        };
        Ok(Self {
            queue: Arc::new(JobQueue::new(
                format!("sync-{}", settings.account),
                worker,
            )?),
        })
    }

    fn submit<F, R>(&self, desc: String, job: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce(&mut CacheWorker, &JobContext<CacheWorker>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.queue.spawn(Cow::Owned(desc), job)
    }

    pub fn reconcile(&self, folder: &str) -> Result<JoinHandle<SyncReport>> {
        let folder = folder.to_string();
        self.submit(format!("sync {}", folder), move |worker, ctx| {
            worker
                .reconcile(&folder, ctx)
                .chain_err_details(|| format!("While synchronizing folder {}", folder))
        })
    }

    pub fn create_folder(&self, folder: &str) -> Result<JoinHandle<()>> {
        let folder = folder.to_string();
        self.submit(format!("cache create {}", folder), move |worker, _| {
            worker.cache.create_folder(&folder)
        })
    }

    /// Drops a folder and its descendants from the cache.
    pub fn delete_folder(&self, folder: &str) -> Result<JoinHandle<()>> {
        let folder = folder.to_string();
        self.submit(format!("cache delete {}", folder), move |worker, _| {
            worker.cache.delete_folder(&folder)
        })
    }

    pub fn rename_folder(&self, old: &str, new: &str) -> Result<JoinHandle<()>> {
        let (old, new) = (old.to_string(), new.to_string());
        self.submit(format!("cache rename {} -> {}", old, new), move |worker, _| {
            worker.cache.rename_folder(&old, &new)
        })
    }

    pub fn reset(&self) -> Result<JoinHandle<()>> {
        self.submit("cache reset".to_string(), |worker, _| worker.cache.reset())
    }

    /// Cached counts of `folder`, read after every queued change.
    pub fn cached_counts(&self, folder: &str) -> Result<FolderCounts> {
        let folder = folder.to_string();
        self.submit(format!("cache counts {}", folder), move |worker, _| {
            worker.cache.counts(&folder)
        })?
        .wait()
    }

    /// Cached message identifiers of `folder`, read after every queued
    /// change.
    pub fn cached_message_ids(&self, folder: &str) -> Result<BTreeSet<String>> {
        let folder = folder.to_string();
        self.submit(format!("cache list {}", folder), move |worker, _| {
            worker.cache.message_ids(&folder, None)
        })?
        .wait()
    }

    pub fn cached_message(&self, folder: &str, message_id: &str) -> Result<Option<CachedMessage>> {
        let (folder, message_id) = (folder.to_string(), message_id.to_string());
        self.submit(format!("cache find {}", message_id), move |worker, _| {
            worker.cache.find(&folder, &message_id)
        })?
        .wait()
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

    /// Cancels outstanding work and closes the cache. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.queue.shutdown()
    }
}
