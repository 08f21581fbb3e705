//
// mailmirror - in-memory store
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

//! A [`RemoteStore`] kept entirely in memory.
//!
//! Useful for tests and for embedding applications that feed messages from
//! elsewhere. Folder failures and per-call latency can be injected to
//! exercise error paths and queue back-pressure.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::RwLock,
    time::Duration,
};

use super::{Flag, MessageHandle, MessageHeaders, MessageUid, RemoteStore, SearchFilter};
use crate::{
    error::{Error, ErrorKind, Result},
    folder::{rebase, Folder, FolderCounts},
};

#[derive(Clone, Debug)]
struct StoredMessage {
    headers: MessageHeaders,
    text: String,
}

#[derive(Clone, Debug, Default)]
struct StoredFolder {
    messages: BTreeMap<MessageUid, StoredMessage>,
    next_uid: MessageUid,
}

#[derive(Debug, Default)]
struct Inner {
    folders: BTreeMap<String, StoredFolder>,
    failing: BTreeSet<String>,
    latency: Option<Duration>,
}

#[derive(Debug)]
pub struct MemoryStore {
    separator: char,
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new('/')
    }
}

impl MemoryStore {
    pub fn new(separator: char) -> Self {
        Self {
            separator,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn folder_not_found(full_name: &str) -> Error {
        Error::new(format!("Folder `{}` does not exist.", full_name)).set_kind(ErrorKind::NotFound)
    }

    fn check(&self, inner: &Inner, full_name: &str) -> Result<()> {
        if let Some(latency) = inner.latency {
            std::thread::sleep(latency);
        }
        if inner.failing.contains(full_name) {
            return Err(Error::new(format!(
                "Connection to folder `{}` was reset.",
                full_name
            ))
            .set_kind(ErrorKind::External));
        }
        if !inner.folders.contains_key(full_name) {
            return Err(Self::folder_not_found(full_name));
        }
        Ok(())
    }

    fn counts(folder: &StoredFolder) -> FolderCounts {
        let mut counts = FolderCounts {
            total: folder.messages.len(),
            ..FolderCounts::default()
        };
        for message in folder.messages.values() {
            let flags = message.headers.flags;
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
        counts
    }

    /// Makes every call touching `full_name` fail with
    /// [`ErrorKind::External`] until cleared.
    pub fn set_failing(&self, full_name: &str, failing: bool) -> Result<()> {
        let mut inner = self.inner.write()?;
        if failing {
            inner.failing.insert(full_name.to_string());
        } else {
            inner.failing.remove(full_name);
        }
        Ok(())
    }

    /// Delays every folder access by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) -> Result<()> {
        self.inner.write()?.latency = latency;
        Ok(())
    }

    /// Appends a message and returns its handle.
    pub fn append(&self, folder: &str, headers: MessageHeaders, text: &str) -> Result<MessageHandle> {
        let mut inner = self.inner.write()?;
        let stored = inner
            .folders
            .get_mut(folder)
            .ok_or_else(|| Self::folder_not_found(folder))?;
        stored.next_uid += 1;
        let uid = stored.next_uid;
        stored.messages.insert(
            uid,
            StoredMessage {
                headers,
                text: text.to_string(),
            },
        );
        Ok(MessageHandle::new(folder, uid))
    }

    pub fn set_flags(&self, handle: &MessageHandle, flags: Flag) -> Result<()> {
        let mut inner = self.inner.write()?;
        let message = inner
            .folders
            .get_mut(&handle.folder)
            .and_then(|f| f.messages.get_mut(&handle.uid))
            .ok_or_else(|| {
                Error::new(format!("Message {} does not exist.", handle)).set_kind(ErrorKind::NotFound)
            })?;
        message.headers.flags = flags;
        Ok(())
    }

    /// Removes every message of `folder` with the given message identifier.
    pub fn remove_message(&self, folder: &str, message_id: &str) -> Result<usize> {
        let mut inner = self.inner.write()?;
        let stored = inner
            .folders
            .get_mut(folder)
            .ok_or_else(|| Self::folder_not_found(folder))?;
        let before = stored.messages.len();
        stored
            .messages
            .retain(|_, m| m.headers.message_id != message_id);
        Ok(before - stored.messages.len())
    }

    pub fn find(&self, folder: &str, message_id: &str) -> Result<Option<MessageHandle>> {
        let inner = self.inner.read()?;
        let stored = inner
            .folders
            .get(folder)
            .ok_or_else(|| Self::folder_not_found(folder))?;
        Ok(stored
            .messages
            .iter()
            .find(|(_, m)| m.headers.message_id == message_id)
            .map(|(uid, _)| MessageHandle::new(folder, *uid)))
    }
}

impl RemoteStore for MemoryStore {
    fn separator(&self) -> char {
        self.separator
    }

    fn list_folders(&self) -> Result<Vec<Folder>> {
        let inner = self.inner.read()?;
        Ok(inner
            .folders
            .iter()
            .map(|(name, f)| Folder::new(name.as_str(), self.separator).with_counts(Self::counts(f)))
            .collect())
    }

    fn folder(&self, full_name: &str) -> Result<Folder> {
        let inner = self.inner.read()?;
        self.check(&inner, full_name)?;
        let stored = &inner.folders[full_name];
        Ok(Folder::new(full_name, self.separator).with_counts(Self::counts(stored)))
    }

    fn folder_children(&self, full_name: &str) -> Result<Vec<String>> {
        let inner = self.inner.read()?;
        self.check(&inner, full_name)?;
        Ok(inner
            .folders
            .keys()
            .filter(|k| {
                k.strip_prefix(full_name)
                    .and_then(|rest| rest.strip_prefix(self.separator))
                    .map_or(false, |rest| !rest.is_empty() && !rest.contains(self.separator))
            })
            .cloned()
            .collect())
    }

    fn list_messages(
        &self,
        folder: &str,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<MessageHandle>> {
        let inner = self.inner.read()?;
        self.check(&inner, folder)?;
        Ok(inner.folders[folder]
            .messages
            .iter()
            .filter(|(_, m)| filter.map_or(true, |f| f.matches(m.headers.flags)))
            .map(|(uid, _)| MessageHandle::new(folder, *uid))
            .collect())
    }

    fn message_headers(&self, handle: &MessageHandle) -> Result<MessageHeaders> {
        let inner = self.inner.read()?;
        self.check(&inner, &handle.folder)?;
        inner.folders[&handle.folder]
            .messages
            .get(&handle.uid)
            .map(|m| m.headers.clone())
            .ok_or_else(|| {
                Error::new(format!("Message {} does not exist.", handle)).set_kind(ErrorKind::NotFound)
            })
    }

    fn message_text(&self, handle: &MessageHandle) -> Result<String> {
        let inner = self.inner.read()?;
        self.check(&inner, &handle.folder)?;
        inner.folders[&handle.folder]
            .messages
            .get(&handle.uid)
            .map(|m| m.text.clone())
            .ok_or_else(|| {
                Error::new(format!("Message {} does not exist.", handle)).set_kind(ErrorKind::NotFound)
            })
    }

    fn create_folder(&self, full_name: &str) -> Result<Folder> {
        let mut inner = self.inner.write()?;
        if inner.folders.contains_key(full_name) {
            return Err(Error::new(format!("Folder `{}` already exists.", full_name))
                .set_kind(ErrorKind::ValueError));
        }
        inner
            .folders
            .insert(full_name.to_string(), StoredFolder::default());
        Ok(Folder::new(full_name, self.separator))
    }

    /// Deletes a folder and every folder below it.
    fn delete_folder(&self, full_name: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        if !inner.folders.contains_key(full_name) {
            return Err(Self::folder_not_found(full_name));
        }
        let separator = self.separator;
        inner
            .folders
            .retain(|k, _| rebase(k, full_name, full_name, separator).is_none());
        Ok(())
    }

    fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<Folder> {
        let mut inner = self.inner.write()?;
        if !inner.folders.contains_key(old_name) {
            return Err(Self::folder_not_found(old_name));
        }
        if inner.folders.contains_key(new_name) {
            return Err(Error::new(format!("Folder `{}` already exists.", new_name))
                .set_kind(ErrorKind::ValueError));
        }
        let moved: Vec<String> = inner
            .folders
            .keys()
            .filter(|k| rebase(k, old_name, new_name, self.separator).is_some())
            .cloned()
            .collect();
        for name in moved {
            if let (Some(stored), Some(target)) = (
                inner.folders.remove(&name),
                rebase(&name, old_name, new_name, self.separator),
            ) {
                inner.folders.insert(target, stored);
            }
        }
        let counts = Self::counts(&inner.folders[new_name]);
        Ok(Folder::new(new_name, self.separator).with_counts(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(message_id: &str, flags: Flag) -> MessageHeaders {
        MessageHeaders {
            message_id: message_id.to_string(),
            from: Some("alice@example.com".to_string()),
            subject: format!("subject of {}", message_id),
            received: Some(1_700_000_000),
            flags,
        }
    }

    #[test]
    fn test_memory_store_counts_and_filters() {
        let store = MemoryStore::default();
        store.create_folder("INBOX").unwrap();
        store.append("INBOX", headers("<a@x>", Flag::RECENT), "a").unwrap();
        store.append("INBOX", headers("<b@x>", Flag::SEEN), "b").unwrap();
        store
            .append("INBOX", headers("<c@x>", Flag::SEEN | Flag::DELETED), "c")
            .unwrap();
        let folder = store.folder("INBOX").unwrap();
        assert_eq!(
            folder.counts,
            FolderCounts {
                total: 3,
                new: 1,
                unread: 1,
                deleted: 1
            }
        );
        assert_eq!(folder.counts.live(), 2);
        assert_eq!(
            store
                .list_messages("INBOX", Some(SearchFilter::NotDeleted))
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.list_messages("INBOX", None).unwrap().len(), 3);
    }

    #[test]
    fn test_memory_store_hierarchy() {
        let store = MemoryStore::default();
        for name in ["Work", "Work/A", "Work/A/Deep", "Work/B", "Workshop"] {
            store.create_folder(name).unwrap();
        }
        assert_eq!(
            store.folder_children("Work").unwrap(),
            vec!["Work/A".to_string(), "Work/B".to_string()]
        );
        store.rename_folder("Work", "Job").unwrap();
        assert!(store.folder("Job/A/Deep").is_ok());
        assert_eq!(
            store.folder("Work").unwrap_err().kind,
            ErrorKind::NotFound
        );
        store.delete_folder("Job").unwrap();
        let names: Vec<String> = store
            .list_folders()
            .unwrap()
            .into_iter()
            .map(|f| f.full_name)
            .collect();
        assert_eq!(names, vec!["Workshop".to_string()]);
    }

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::default();
        store.create_folder("INBOX").unwrap();
        store.set_failing("INBOX", true).unwrap();
        assert_eq!(
            store.list_messages("INBOX", None).unwrap_err().kind,
            ErrorKind::External
        );
        store.set_failing("INBOX", false).unwrap();
        assert!(store.list_messages("INBOX", None).unwrap().is_empty());
    }
}
