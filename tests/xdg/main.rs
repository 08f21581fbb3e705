//
// mailmirror - XDG data directory tests
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

use rusty_fork::rusty_fork_test;

rusty_fork_test! {
    #[test]
    fn test_xdg_data_home() {
        tests::run_xdg_data_home();
    }
}

mod tests {
    use std::sync::Arc;

    use mailmirror::{
        backends::MemoryStore,
        utils::logging::{LogLevel, StderrLogger},
        Flag, MessageHeaders, RemoteStore, Session, Settings,
    };
    use tempfile::TempDir;

    pub fn run_xdg_data_home() {
        let tmp_dir = TempDir::new().unwrap();
        std::env::set_var("XDG_DATA_HOME", tmp_dir.path());
        let logger = StderrLogger::new(LogLevel::INFO);
        logger.set_log_level(LogLevel::TRACE);
        assert_eq!(logger.log_level(), LogLevel::TRACE);

        let settings: Settings = r#"
account = "grace"
inbox = "INBOX"
separator = "/"
"#
        .parse()
        .unwrap();
        assert_eq!(settings.data_dir, None);

        let store = Arc::new(MemoryStore::default());
        store.create_folder("INBOX").unwrap();
        store
            .append(
                "INBOX",
                MessageHeaders {
                    message_id: "<g@x>".to_string(),
                    from: Some("grace@example.com".to_string()),
                    subject: "stored under XDG_DATA_HOME".to_string(),
                    received: Some(1_000_000),
                    flags: Flag::SEEN,
                },
                "hello",
            )
            .unwrap();
        let session = Session::open(settings, store).unwrap();
        session.sync_inbox().unwrap().wait().unwrap();
        session.wait_idle().unwrap();
        assert!(session.searcher().exists("<g@x>", "INBOX").unwrap());
        session.shutdown().unwrap();

        let data_dir = tmp_dir.path().join("mailmirror");
        assert!(data_dir.join("grace_index.db").is_file());
        assert!(data_dir.join("grace_cache.db").is_file());
    }
}
