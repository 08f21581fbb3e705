//
// mailmirror - synchronization integration tests
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

use std::{collections::BTreeSet, sync::Arc};

use mailmirror::{
    backends::MemoryStore, Flag, MessageHeaders, RemoteStore, SearchFilter, Session, Settings,
};
use tempfile::TempDir;

fn headers(message_id: &str, flags: Flag) -> MessageHeaders {
    MessageHeaders {
        message_id: message_id.to_string(),
        from: None,
        subject: format!("re: {}", message_id),
        received: Some(1_650_000_000),
        flags,
    }
}

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn setup(folders: &[&str]) -> (TempDir, Arc<MemoryStore>, Session) {
    let tmp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    for folder in folders {
        store.create_folder(folder).unwrap();
    }
    let settings = Settings::with_data_dir("frank", tmp_dir.path());
    let session = Session::open(settings, store.clone()).unwrap();
    (tmp_dir, store, session)
}

#[test]
fn test_sync_inbox_updates_cache_and_index() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    for mid in ["<b@x>", "<c@x>", "<d@x>"] {
        store.append("INBOX", headers(mid, Flag::SEEN), "hello").unwrap();
    }
    session.sync_inbox().unwrap().wait().unwrap();
    session.wait_idle().unwrap();
    assert_eq!(session.searcher().count_in_folder("INBOX").unwrap(), 3);

    store.remove_message("INBOX", "<d@x>").unwrap();
    store.append("INBOX", headers("<a@x>", Flag::RECENT), "hello").unwrap();
    let report = session.sync_inbox().unwrap().wait().unwrap();
    assert_eq!(report.filters, vec![SearchFilter::NotDeleted]);
    assert_eq!(report.added, ids(&["<a@x>"]));
    assert_eq!(report.removed, ids(&["<d@x>"]));
    session.wait_idle().unwrap();

    let mut indexed = session
        .searcher()
        .message_ids_in_folder("INBOX")
        .unwrap();
    indexed.sort();
    assert_eq!(indexed, vec!["<a@x>", "<b@x>", "<c@x>"]);
    assert_eq!(
        session.synchronizer().cached_message_ids("INBOX").unwrap(),
        ids(&["<a@x>", "<b@x>", "<c@x>"])
    );
    let listed = session.search_folder("INBOX", None, None, None).unwrap();
    assert!(listed.iter().all(|m| m.sender == "Unknown"));
    session.shutdown().unwrap();
}

#[test]
fn test_sync_partial_by_counts() {
    let (_tmp_dir, store, session) = setup(&["INBOX", "Lists"]);
    let fresh = store
        .append("Lists", headers("<n@x>", Flag::RECENT), "new one")
        .unwrap();
    store.append("Lists", headers("<r@x>", Flag::SEEN), "read one").unwrap();
    let report = session.reconcile("Lists").unwrap().wait().unwrap();
    assert_eq!(report.filters[0], SearchFilter::New);
    assert_eq!(report.added, ids(&["<n@x>", "<r@x>"]));

    // Nothing changed: counts agree and nothing is fetched.
    let report = session.reconcile("Lists").unwrap().wait().unwrap();
    assert!(report.filters.is_empty());
    assert!(report.is_noop());

    // A flag-only change keeps the message cached and indexed.
    store.set_flags(&fresh, Flag::SEEN).unwrap();
    let report = session.reconcile("Lists").unwrap().wait().unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.restored, ids(&["<n@x>"]));
    session.wait_idle().unwrap();
    assert!(session.searcher().exists("<n@x>", "Lists").unwrap());
    assert_eq!(
        session
            .synchronizer()
            .cached_counts("Lists")
            .unwrap()
            .unread,
        0
    );

    // Deleted remotely: dropped from the cache and from the index.
    store.set_flags(&fresh, Flag::SEEN | Flag::DELETED).unwrap();
    let report = session.reconcile("Lists").unwrap().wait().unwrap();
    assert_eq!(report.removed, ids(&["<n@x>"]));
    session.wait_idle().unwrap();
    assert!(!session.searcher().exists("<n@x>", "Lists").unwrap());
    session.shutdown().unwrap();
}

#[test]
fn test_sync_follows_folder_operations() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    session.create_folder("Projects").unwrap();
    session.create_folder("Projects/2024").unwrap();
    store
        .append("Projects/2024", headers("<p@x>", Flag::SEEN), "plans")
        .unwrap();
    session.reconcile("Projects/2024").unwrap().wait().unwrap();
    session.wait_idle().unwrap();

    session.rename_folder("Projects", "Archive").unwrap();
    session.wait_idle().unwrap();
    assert_eq!(
        session
            .synchronizer()
            .cached_message_ids("Archive/2024")
            .unwrap(),
        ids(&["<p@x>"])
    );
    assert!(session.searcher().exists("<p@x>", "Archive/2024").unwrap());
    assert!(session
        .synchronizer()
        .cached_message_ids("Projects/2024")
        .unwrap()
        .is_empty());

    session.delete_folder("Archive").unwrap();
    session.wait_idle().unwrap();
    assert!(session
        .synchronizer()
        .cached_message_ids("Archive/2024")
        .unwrap()
        .is_empty());
    assert_eq!(session.searcher().count_in_folder("Archive/2024").unwrap(), 0);
    assert!(session.folder("Archive").unwrap().is_none());
    assert!(session.folder("Archive/2024").unwrap().is_none());
    session.shutdown().unwrap();
}
