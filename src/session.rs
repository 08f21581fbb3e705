//
// mailmirror - session.rs
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

//! Per user entry point.
//!
//! A [`Session`] owns the indexer, searcher and synchronizer of one account
//! and the arena of known folders. Folder operations are applied to the
//! remote store first, then mirrored into the index, the local cache and
//! the arena.

use std::{collections::VecDeque, sync::Arc, sync::Mutex};

use crate::{
    backends::{MessageHandle, RemoteStore},
    conf::Settings,
    error::{Error, ErrorKind, Result},
    folder::{Folder, FolderTree},
    index::{IndexReport, Indexer},
    jobs::JoinHandle,
    search::{Message, MessageSearcher, Page, SearchConditions},
    sync::{FolderSynchronizer, SyncReport},
    utils::{SortField, SortOrder},
};

#[derive(Debug)]
pub struct Session {
    settings: Settings,
    store: Arc<dyn RemoteStore>,
    indexer: Option<Indexer>,
    searcher: MessageSearcher,
    synchronizer: FolderSynchronizer,
    folders: Mutex<FolderTree>,
}

impl Session {
    /// Opens the index and the local cache of `settings.account`.
    ///
    /// An index that cannot be opened is fatal here; see
    /// [`Session::open_read_only`].
    pub fn open(settings: Settings, store: Arc<dyn RemoteStore>) -> Result<Self> {
        settings.validate()?;
        let indexer = Indexer::new(&settings, store.clone())?;
        let searcher = MessageSearcher::new(&settings)?;
        let synchronizer =
            FolderSynchronizer::new(&settings, store.clone(), Some(indexer.clone()))?;
        log::debug!("Session for account {} opened", settings.account);
        Ok(Self {
            folders: Mutex::new(FolderTree::new(store.separator())),
            settings,
            store,
            indexer: Some(indexer),
            searcher,
            synchronizer,
        })
    }

    /// Opens a session that searches an existing index without writing to
    /// it. Index mutations fail with [`ErrorKind::NotSupported`].
    pub fn open_read_only(settings: Settings, store: Arc<dyn RemoteStore>) -> Result<Self> {
        settings.validate()?;
        let searcher = MessageSearcher::read_only(&settings)?;
        let synchronizer = FolderSynchronizer::new(&settings, store.clone(), None)?;
        log::warn!(
            "Session for account {} opened without indexing",
            settings.account
        );
        Ok(Self {
            folders: Mutex::new(FolderTree::new(store.separator())),
            settings,
            store,
            indexer: None,
            searcher,
            synchronizer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn indexer(&self) -> Option<&Indexer> {
        self.indexer.as_ref()
    }

    pub fn searcher(&self) -> &MessageSearcher {
        &self.searcher
    }

    pub fn synchronizer(&self) -> &FolderSynchronizer {
        &self.synchronizer
    }

    pub fn is_read_only(&self) -> bool {
        self.indexer.is_none()
    }

    fn writable_indexer(&self) -> Result<&Indexer> {
        self.indexer.as_ref().ok_or_else(|| {
            Error::new(format!(
                "Indexing is unavailable for account `{}`.",
                self.settings.account
            ))
            .set_kind(ErrorKind::NotSupported)
        })
    }

    pub fn index_message(&self, handle: MessageHandle) -> Result<JoinHandle<IndexReport>> {
        self.writable_indexer()?.index_message(handle)
    }

    pub fn index_folder(&self, folder: &str) -> Result<JoinHandle<IndexReport>> {
        self.writable_indexer()?.index_folder(folder)
    }

    pub fn de_index_message(&self, message_id: &str, folder: &str) -> Result<JoinHandle<IndexReport>> {
        self.writable_indexer()?.de_index_message(message_id, folder)
    }

    /// De-indexes `folder` and its descendants, children before their
    /// parent.
    pub fn de_index_folder(&self, folder: &str) -> Result<Vec<JoinHandle<IndexReport>>> {
        let indexer = self.writable_indexer()?;
        self.remote_subtree(folder)?
            .post_order(folder)
            .iter()
            .map(|name| indexer.de_index_folder(name))
            .collect()
    }

    /// Relabels the documents of exactly `old` as belonging to `new`.
    pub fn move_folder(&self, old: &str, new: &str) -> Result<JoinHandle<IndexReport>> {
        self.writable_indexer()?.move_folder(old, new)
    }

    /// Messages `[start, end)` of `folder`. Without `sort` the configured
    /// default sort is used, in ascending order.
    pub fn search_folder(
        &self,
        folder: &str,
        start: Option<usize>,
        end: Option<usize>,
        sort: Option<SortField>,
    ) -> Result<Vec<Message>> {
        self.searcher.list_in_folder_sorted(
            folder,
            sort.unwrap_or(self.settings.default_sort),
            SortOrder::Asc,
            Page::from_bounds(start, end),
        )
    }

    pub fn search(
        &self,
        conditions: &SearchConditions,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Vec<Message>> {
        self.searcher
            .search_page(conditions, Page::from_bounds(start, end))
    }

    /// Replaces the folder arena with the remote folder list.
    pub fn refresh_folders(&self) -> Result<Vec<Folder>> {
        let list = self.store.list_folders()?;
        let mut tree = FolderTree::new(self.store.separator());
        for folder in list.iter().cloned() {
            tree.insert(folder);
        }
        *self.folders.lock()? = tree;
        Ok(list)
    }

    /// Known folders, in full name order.
    pub fn folders(&self) -> Result<Vec<Folder>> {
        Ok(self.folders.lock()?.iter().cloned().collect())
    }

    pub fn folder(&self, full_name: &str) -> Result<Option<Folder>> {
        Ok(self.folders.lock()?.get(full_name).cloned())
    }

    pub fn create_folder(&self, full_name: &str) -> Result<Folder> {
        let folder = self.store.create_folder(full_name)?;
        self.synchronizer.create_folder(&folder.full_name)?;
        self.folders.lock()?.insert(folder.clone());
        Ok(folder)
    }

    /// Renames a folder and its descendants on the remote store, then
    /// relabels their index documents and cached messages.
    pub fn rename_folder(&self, old: &str, new: &str) -> Result<Folder> {
        let mut subtree = self.remote_subtree(old)?;
        let moved = subtree.rename(old, new)?;
        let folder = self.store.rename_folder(old, new)?;
        if let Some(indexer) = self.indexer.as_ref() {
            for (old_name, new_name) in &moved {
                indexer.move_folder(old_name, new_name)?;
            }
        }
        self.synchronizer.rename_folder(old, new)?;
        let mut tree = self.folders.lock()?;
        tree.remove_subtree(old);
        for folder in subtree.iter() {
            tree.insert(folder.clone());
        }
        tree.insert(folder.clone());
        log::info!("Folder {} renamed to {} ({} folders)", old, new, moved.len());
        Ok(folder)
    }

    /// Deletes a folder and its descendants everywhere.
    pub fn delete_folder(&self, full_name: &str) -> Result<()> {
        let subtree = self.remote_subtree(full_name)?;
        if let Some(indexer) = self.indexer.as_ref() {
            for name in subtree.post_order(full_name) {
                indexer.de_index_folder(&name)?;
            }
        }
        self.store.delete_folder(full_name)?;
        self.synchronizer.delete_folder(full_name)?;
        self.folders.lock()?.remove_subtree(full_name);
        log::info!("Folder {} deleted ({} folders)", full_name, subtree.len());
        Ok(())
    }

    pub fn sync_inbox(&self) -> Result<JoinHandle<SyncReport>> {
        self.reconcile(&self.settings.inbox)
    }

    pub fn reconcile(&self, folder: &str) -> Result<JoinHandle<SyncReport>> {
        self.synchronizer.reconcile(folder)
    }

    /// Blocks until both queues drained, including index tasks queued by
    /// synchronization.
    pub fn wait_idle(&self) -> Result<()> {
        self.synchronizer.wait_idle()?;
        if let Some(indexer) = self.indexer.as_ref() {
            indexer.wait_idle()?;
        }
        Ok(())
    }

    /// Stops both queues. Outstanding work is cancelled. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let synchronizer = self.synchronizer.shutdown();
        let indexer = self.indexer.as_ref().map_or(Ok(()), Indexer::shutdown);
        synchronizer.and(indexer)
    }

    /// `full_name` and its descendants as currently known to the remote
    /// store.
    fn remote_subtree(&self, full_name: &str) -> Result<FolderTree> {
        let separator = self.store.separator();
        let mut tree = FolderTree::new(separator);
        let mut queue = VecDeque::from([full_name.to_string()]);
        while let Some(name) = queue.pop_front() {
            queue.extend(self.store.folder_children(&name)?);
            tree.insert(Folder::new(name, separator));
        }
        Ok(tree)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!(
                "Could not shut down session of account {}: {}",
                self.settings.account,
                err
            );
        }
    }
}
