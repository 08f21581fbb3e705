//
// mailmirror - datetime
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

//! Timestamps and the fixed-width date encoding of the search index.
//!
//! Dates are stored in the index as `yyyyMMddHHmmss` in UTC so that their
//! lexical order is their chronological order. Unknown dates are stored as
//! the empty string, which sorts before every known date.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, Utc};

pub type UnixTimestamp = u64;

pub mod formats {
    /// `yyyyMMddHHmmss`
    pub const INDEX_DATE: &str = "%Y%m%d%H%M%S";
    /// Used for log lines.
    pub const RFC3339_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";
}

pub fn now() -> UnixTimestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn to_datetime(timestamp: UnixTimestamp) -> Option<DateTime<Utc>> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

pub fn timestamp_to_string(timestamp: UnixTimestamp, fmt: Option<&str>) -> String {
    to_datetime(timestamp)
        .map(|d| {
            d.format(fmt.unwrap_or(formats::RFC3339_DATETIME))
                .to_string()
        })
        .unwrap_or_default()
}

/// 9999-12-31T23:59:59Z, the last instant with a four digit year.
pub const MAX_INDEX_DATE: UnixTimestamp = 253_402_300_799;

/// Encodes an optional timestamp in the sortable index date format.
/// Timestamps past [`MAX_INDEX_DATE`] do not fit the fixed width encoding
/// and are stored as unknown.
pub fn to_index_date(timestamp: Option<UnixTimestamp>) -> String {
    timestamp
        .filter(|t| *t <= MAX_INDEX_DATE)
        .map(|t| timestamp_to_string(t, Some(formats::INDEX_DATE)))
        .unwrap_or_default()
}

/// Decodes an index date; the empty string and malformed values give `None`.
pub fn from_index_date(value: &str) -> Option<UnixTimestamp> {
    if value.len() != 14 {
        return None;
    }
    let parsed = NaiveDateTime::parse_from_str(value, formats::INDEX_DATE).ok()?;
    u64::try_from(parsed.and_utc().timestamp()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_index_date() {
        // 2009-02-13T23:31:30Z
        let ts: UnixTimestamp = 1_234_567_890;
        assert_eq!(to_index_date(Some(ts)), "20090213233130");
        assert_eq!(from_index_date("20090213233130"), Some(ts));
        assert_eq!(to_index_date(None), "");
        assert_eq!(from_index_date(""), None);
        assert_eq!(from_index_date("2009-02-13"), None);
        assert!(to_index_date(Some(0)) < to_index_date(Some(ts)));
    }

    #[test]
    fn test_datetime_index_date_year_overflow() {
        assert_eq!(to_index_date(Some(MAX_INDEX_DATE)), "99991231235959");
        assert_eq!(
            from_index_date("99991231235959"),
            Some(MAX_INDEX_DATE)
        );
        assert_eq!(to_index_date(Some(MAX_INDEX_DATE + 1)), "");
        assert_eq!(to_index_date(Some(u64::MAX)), "");
    }
}
