//
// mailmirror - indexing integration tests
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

use std::{sync::Arc, time::Duration};

use mailmirror::{
    backends::MemoryStore, ErrorKind, Flag, MessageHeaders, MessageSearcher, RemoteStore,
    SearchConditions,
    SearchFields, Session, Settings, SortField,
};
use tempfile::TempDir;

fn headers(message_id: &str, subject: &str, received: u64) -> MessageHeaders {
    MessageHeaders {
        message_id: message_id.to_string(),
        from: Some("Erin <erin@example.com>".to_string()),
        subject: subject.to_string(),
        received: Some(received),
        flags: Flag::SEEN,
    }
}

fn setup(folders: &[&str]) -> (TempDir, Arc<MemoryStore>, Session) {
    let tmp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    for folder in folders {
        store.create_folder(folder).unwrap();
    }
    let settings = Settings::with_data_dir("erin", tmp_dir.path());
    let session = Session::open(settings, store.clone()).unwrap();
    (tmp_dir, store, session)
}

#[test]
fn test_indexing_is_idempotent() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    let handle = store
        .append("INBOX", headers("<a@x>", "lunch", 10), "see you at noon")
        .unwrap();
    for _ in 0..3 {
        session.index_message(handle.clone()).unwrap();
    }
    session.index_folder("INBOX").unwrap();
    session.wait_idle().unwrap();
    assert_eq!(session.searcher().count_in_folder("INBOX").unwrap(), 1);
    assert!(session.searcher().exists("<a@x>", "INBOX").unwrap());

    session.de_index_message("<a@x>", "INBOX").unwrap();
    session.wait_idle().unwrap();
    assert!(!session.searcher().exists("<a@x>", "INBOX").unwrap());
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_folder_twice_is_noop() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    for mid in ["<a@x>", "<b@x>", "<c@x>"] {
        store.append("INBOX", headers(mid, mid, 1), "body").unwrap();
    }
    let first = session.index_folder("INBOX").unwrap().wait().unwrap();
    assert_eq!(first.added, 3);
    let second = session.index_folder("INBOX").unwrap().wait().unwrap();
    assert!(second.is_noop(), "{:?}", second);
    assert_eq!(second.failed, 0);
    assert_eq!(session.searcher().count_in_folder("INBOX").unwrap(), 3);
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_folder_reconciles_stale_documents() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    for mid in ["<b@x>", "<c@x>", "<d@x>"] {
        store.append("INBOX", headers(mid, mid, 1), "body").unwrap();
    }
    let report = session.index_folder("INBOX").unwrap().wait().unwrap();
    assert_eq!(report.added, 3);

    store.remove_message("INBOX", "<d@x>").unwrap();
    store.append("INBOX", headers("<a@x>", "a", 2), "body").unwrap();
    let report = session.index_folder("INBOX").unwrap().wait().unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.queued, 1);
    session.wait_idle().unwrap();
    let mut ids = session
        .searcher()
        .message_ids_in_folder("INBOX")
        .unwrap();
    ids.sort();
    assert_eq!(ids, vec!["<a@x>", "<b@x>", "<c@x>"]);
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_same_message_in_two_folders() {
    let (_tmp_dir, store, session) = setup(&["INBOX", "Archive"]);
    store.append("INBOX", headers("<a@x>", "a", 1), "body").unwrap();
    store.append("Archive", headers("<a@x>", "a", 1), "body").unwrap();
    session.index_folder("INBOX").unwrap();
    session.index_folder("Archive").unwrap();
    session.wait_idle().unwrap();
    assert!(session.searcher().exists("<a@x>", "INBOX").unwrap());
    assert!(session.searcher().exists("<a@x>", "Archive").unwrap());

    session.de_index_message("<a@x>", "INBOX").unwrap();
    session.wait_idle().unwrap();
    assert!(!session.searcher().exists("<a@x>", "INBOX").unwrap());
    assert!(session.searcher().exists("<a@x>", "Archive").unwrap());
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_rename_moves_documents() {
    let (_tmp_dir, store, session) = setup(&["Work", "Work/Old", "Workshop"]);
    store.append("Work", headers("<w@x>", "w", 1), "body").unwrap();
    store.append("Work/Old", headers("<o@x>", "o", 1), "body").unwrap();
    store.append("Workshop", headers("<s@x>", "s", 1), "body").unwrap();
    for folder in ["Work", "Work/Old", "Workshop"] {
        session.index_folder(folder).unwrap();
    }
    session.refresh_folders().unwrap();
    session.wait_idle().unwrap();

    session.rename_folder("Work", "Job").unwrap();
    session.wait_idle().unwrap();
    let searcher = session.searcher();
    assert_eq!(searcher.count_in_folder("Work").unwrap(), 0);
    assert_eq!(searcher.count_in_folder("Work/Old").unwrap(), 0);
    assert!(searcher.exists("<w@x>", "Job").unwrap());
    assert!(searcher.exists("<o@x>", "Job/Old").unwrap());
    assert!(searcher.exists("<s@x>", "Workshop").unwrap());
    let names: Vec<String> = session
        .folders()
        .unwrap()
        .into_iter()
        .map(|f| f.full_name)
        .collect();
    assert_eq!(names, vec!["Job", "Job/Old", "Workshop"]);

    // The moved documents can be de-indexed under their new folder.
    session.de_index_message("<o@x>", "Job/Old").unwrap();
    session.wait_idle().unwrap();
    assert!(!searcher.exists("<o@x>", "Job/Old").unwrap());
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_recursive_de_index() {
    let (_tmp_dir, store, session) = setup(&["A", "A/B", "A/B/C", "AB"]);
    for folder in ["A", "A/B", "A/B/C", "AB"] {
        store.append(folder, headers("<m@x>", folder, 1), "body").unwrap();
        session.index_folder(folder).unwrap();
    }
    session.wait_idle().unwrap();

    let handles = session.de_index_folder("A").unwrap();
    assert_eq!(handles.len(), 3);
    let removed: usize = handles.into_iter().map(|h| h.wait().unwrap().removed).sum();
    assert_eq!(removed, 3);
    for folder in ["A", "A/B", "A/B/C"] {
        assert_eq!(session.searcher().count_in_folder(folder).unwrap(), 0);
    }
    assert_eq!(session.searcher().count_in_folder("AB").unwrap(), 1);
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_failure_does_not_block_queue() {
    let (_tmp_dir, store, session) = setup(&["Bad", "Good"]);
    store.append("Good", headers("<g@x>", "g", 1), "body").unwrap();
    store.set_failing("Bad", true).unwrap();
    let bad = session.index_folder("Bad").unwrap();
    let good = session.index_folder("Good").unwrap();
    assert_eq!(bad.wait().unwrap_err().kind, ErrorKind::External);
    assert_eq!(good.wait().unwrap().added, 1);
    session.shutdown().unwrap();
}

#[test]
fn test_indexing_shutdown_cancels_outstanding_work() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    for i in 0..20 {
        store
            .append("INBOX", headers(&format!("<{}@x>", i), "slow", i), "body")
            .unwrap();
    }
    store.set_latency(Some(Duration::from_millis(50))).unwrap();
    let running = session.index_folder("INBOX").unwrap();
    let queued = session.index_folder("INBOX").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    session.shutdown().unwrap();
    assert_eq!(running.wait().unwrap_err().kind, ErrorKind::Cancelled);
    assert_eq!(queued.wait().unwrap_err().kind, ErrorKind::Cancelled);

    // Whatever the cancelled task wrote before stopping is committed and
    // nothing is written afterwards.
    let searcher = MessageSearcher::read_only(session.settings()).unwrap();
    let indexed = searcher.count_in_folder("INBOX").unwrap();
    assert!(indexed < 20, "{} messages indexed after shutdown", indexed);
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(searcher.count_in_folder("INBOX").unwrap(), indexed);
    session.shutdown().unwrap();
    assert_eq!(searcher.count_in_folder("INBOX").unwrap(), indexed);
    assert_eq!(
        session.index_folder("INBOX").unwrap_err().kind,
        ErrorKind::Cancelled
    );
}

#[test]
fn test_search_pages_and_text() {
    let (_tmp_dir, store, session) = setup(&["INBOX"]);
    for i in 0..12_u64 {
        let subject = if i % 3 == 0 { "Invoice due" } else { "Newsletter" };
        store
            .append(
                "INBOX",
                headers(&format!("<{:02}@x>", i), subject, 100 - i),
                "monthly content",
            )
            .unwrap();
    }
    session.index_folder("INBOX").unwrap();
    session.wait_idle().unwrap();

    let page = session
        .search_folder("INBOX", Some(0), Some(5), Some(SortField::Date))
        .unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(page[0].message_id, "<11@x>");
    let tail = session
        .search_folder("INBOX", Some(10), Some(20), None)
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert!(session
        .search_folder("INBOX", Some(20), None, None)
        .unwrap()
        .is_empty());

    let invoices = session
        .search(
            &SearchConditions::new()
                .in_folder("INBOX")
                .matching("invoice")
                .fields(SearchFields::SUBJECT),
            None,
            None,
        )
        .unwrap();
    assert_eq!(invoices.len(), 4);
    assert!(invoices.iter().all(|m| m.subject == "Invoice due"));
    assert_eq!(invoices[0].sender, "Erin <erin@example.com>");
    let none = session
        .search(
            &SearchConditions::new()
                .matching("invoice")
                .fields(SearchFields::CONTENT),
            None,
            None,
        )
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(
        session
            .search(&SearchConditions::new().matching("(invoice"), None, None)
            .unwrap_err()
            .kind,
        ErrorKind::Query
    );
    session.shutdown().unwrap();
}

#[test]
fn test_read_only_session() {
    let tmp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    store.create_folder("INBOX").unwrap();
    let settings = Settings::with_data_dir("erin", tmp_dir.path());
    assert_eq!(
        Session::open_read_only(settings.clone(), store.clone())
            .unwrap_err()
            .kind,
        ErrorKind::NotFound
    );
    {
        let session = Session::open(settings.clone(), store.clone()).unwrap();
        store.append("INBOX", headers("<a@x>", "a", 1), "body").unwrap();
        session.index_folder("INBOX").unwrap().wait().unwrap();
    }
    let session = Session::open_read_only(settings, store).unwrap();
    assert!(session.is_read_only());
    assert!(session.searcher().exists("<a@x>", "INBOX").unwrap());
    assert_eq!(
        session.index_folder("INBOX").unwrap_err().kind,
        ErrorKind::NotSupported
    );
    assert_eq!(
        session.de_index_folder("INBOX").unwrap_err().kind,
        ErrorKind::NotSupported
    );
    session.shutdown().unwrap();
}
