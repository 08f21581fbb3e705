//
// mailmirror - lib.rs
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

#![deny(
    unsafe_op_in_unsafe_fn,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    /* restriction */
    clippy::dbg_macro,
    /* rustdoc */
    rustdoc::broken_intra_doc_links,
    /* pedantic */
    clippy::doc_markdown,
    clippy::expect_fun_call,
    clippy::or_fun_call,
)]
#![allow(clippy::option_if_let_else, clippy::missing_const_for_fn)]

//! Asynchronous indexing and folder synchronization for webmail clients.
//!
//! The crate mirrors a remote message store into
//! - a full-text search index, mutated only by the single worker of an
//!   [`Indexer`](index::Indexer) queue and read by a stateless
//!   [`MessageSearcher`](search::MessageSearcher), and
//! - a local message cache, reconciled against remote folders by a
//!   [`FolderSynchronizer`](sync::FolderSynchronizer) running on its own
//!   single worker.
//!
//! Remote stores are reached through the [`RemoteStore`](backends::RemoteStore)
//! trait. [`Session`](session::Session) ties everything together for a single
//! user.

#[macro_use]
extern crate serde_derive;
pub extern crate log;
#[macro_use]
extern crate bitflags;
pub extern crate futures;
pub extern crate indexmap;
pub extern crate rusqlite;
pub extern crate uuid;

pub mod error;
pub use error::*;

pub mod utils;
pub use utils::{
    datetime::UnixTimestamp,
    logging::{LogLevel, StderrLogger},
    SortField, SortOrder,
};

pub mod conf;
pub use conf::Settings;

pub mod backends;
pub use backends::{Flag, MessageHandle, MessageHeaders, RemoteStore, SearchFilter};

pub mod folder;
pub use folder::{Folder, FolderCounts, FolderTree};

pub mod jobs;

pub mod index;
pub use index::{IndexReport, IndexTask, Indexer, UniqueId};

pub mod search;
pub use search::{Message, MessageSearcher, Page, SearchConditions, SearchFields};

pub mod sync;
pub use sync::{FolderSynchronizer, SyncReport};

pub mod session;
pub use session::Session;
