//
// mailmirror - backends
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

//! Access to the remote message store.
//!
//! Protocol specific connection handling lives outside this crate; stores are
//! reached only through the blocking [`RemoteStore`] trait. Every method may
//! block on network I/O, so they are called from queue workers and never from
//! code that must stay responsive.

pub mod memory;

pub use memory::MemoryStore;

use crate::{error::Result, folder::Folder, UnixTimestamp};

/// Protocol level message number, unique within one folder.
pub type MessageUid = u64;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct Flag: u8 {
        const SEEN     = 0b0000_0001;
        const RECENT   = 0b0000_0010;
        const DELETED  = 0b0000_0100;
        const ANSWERED = 0b0000_1000;
        const FLAGGED  = 0b0001_0000;
        const DRAFT    = 0b0010_0000;
    }
}

impl Flag {
    pub fn is_seen(self) -> bool {
        self.contains(Self::SEEN)
    }

    pub fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }
}

/// Identifies a message in a remote folder. Handles are plain values, so
/// taking one captures the message reference at that moment.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct MessageHandle {
    pub folder: String,
    pub uid: MessageUid,
}

impl MessageHandle {
    pub fn new<S: Into<String>>(folder: S, uid: MessageUid) -> Self {
        Self {
            folder: folder.into(),
            uid,
        }
    }

    /// Full name of the folder the message lives in.
    pub fn folder_full_name(&self) -> &str {
        &self.folder
    }
}

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}#{}", self.folder, self.uid)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MessageHeaders {
    pub message_id: String,
    pub from: Option<String>,
    pub subject: String,
    pub received: Option<UnixTimestamp>,
    pub flags: Flag,
}

/// Server side search criteria used by partial synchronization.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SearchFilter {
    /// Recent and not seen.
    New,
    /// Not seen.
    Unread,
    /// Not flagged as deleted.
    NotDeleted,
}

impl SearchFilter {
    pub fn matches(self, flags: Flag) -> bool {
        match self {
            Self::New => flags.contains(Flag::RECENT) && !flags.is_seen(),
            Self::Unread => !flags.is_seen(),
            Self::NotDeleted => !flags.is_deleted(),
        }
    }
}

impl std::fmt::Display for SearchFilter {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::New => write!(fmt, "new"),
            Self::Unread => write!(fmt, "unread"),
            Self::NotDeleted => write!(fmt, "not deleted"),
        }
    }
}

pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    /// Hierarchy separator of folder full names.
    fn separator(&self) -> char;

    /// Every folder of the store, with fresh counts.
    fn list_folders(&self) -> Result<Vec<Folder>>;

    /// Fetches a folder and its counts from the store, bypassing any cache.
    fn folder(&self, full_name: &str) -> Result<Folder>;

    /// Full names of the direct children of a folder.
    fn folder_children(&self, full_name: &str) -> Result<Vec<String>>;

    fn list_messages(
        &self,
        folder: &str,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<MessageHandle>>;

    fn message_headers(&self, handle: &MessageHandle) -> Result<MessageHeaders>;

    /// Plain text of the message body, used for full text search.
    fn message_text(&self, handle: &MessageHandle) -> Result<String>;

    fn create_folder(&self, full_name: &str) -> Result<Folder>;

    fn delete_folder(&self, full_name: &str) -> Result<()>;

    fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<Folder>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backends_search_filter() {
        let new = Flag::RECENT;
        let read_recent = Flag::RECENT | Flag::SEEN;
        let deleted = Flag::DELETED | Flag::SEEN;
        assert!(SearchFilter::New.matches(new));
        assert!(!SearchFilter::New.matches(read_recent));
        assert!(!SearchFilter::New.matches(Flag::empty()));
        assert!(SearchFilter::Unread.matches(Flag::empty()));
        assert!(!SearchFilter::Unread.matches(read_recent));
        assert!(SearchFilter::NotDeleted.matches(read_recent));
        assert!(!SearchFilter::NotDeleted.matches(deleted));
    }
}
