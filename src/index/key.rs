//
// mailmirror - unique document keys
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

//! Per-message keys of the search index.
//!
//! A key is derived from the folder full name and the protocol message
//! identifier, so a message keeps its key while it stays in one folder and
//! gets a new one when its folder is renamed.
//!
//! Two schemes are available:
//!
//! - [`KeyScheme::Uuid`], a name based UUID (version 5, SHA-1) of
//!   `folder ":_-_:" message_id`. This is the default.
//! - [`KeyScheme::LegacyHash`], the decimal rendering of a 32-bit string hash
//!   of the same input, kept so indexes written by older deployments can be
//!   read and updated in place. Negative hashes are written as `"0"` followed
//!   by their absolute value, so a hash of `-5` and a hash of `5` behind a
//!   literal `0` both give `"05"`. Together with the 32-bit width this makes
//!   collisions possible; they are detected and logged on insertion.

use uuid::Uuid;

/// Joins folder and message identifier before hashing.
pub const KEY_SEPARATOR: &str = ":_-_:";

const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6d61_696c_6d69_7272_6f72_2d6b_6579_7321);

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyScheme {
    #[default]
    Uuid,
    LegacyHash,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn new(scheme: KeyScheme, folder: &str, message_id: &str) -> Self {
        let input = format!("{}{}{}", folder, KEY_SEPARATOR, message_id);
        match scheme {
            KeyScheme::Uuid => Self(
                Uuid::new_v5(&KEY_NAMESPACE, input.as_bytes())
                    .hyphenated()
                    .to_string(),
            ),
            KeyScheme::LegacyHash => Self(legacy_key(string_hash(&input))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UniqueId {
    fn from(val: String) -> Self {
        Self(val)
    }
}

impl From<&str> for UniqueId {
    fn from(val: &str) -> Self {
        Self(val.to_string())
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl rusqlite::types::ToSql for UniqueId {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(rusqlite::types::ToSqlOutput::from(self.0.as_str()))
    }
}

impl rusqlite::types::FromSql for UniqueId {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        <String as rusqlite::types::FromSql>::column_result(value).map(Self)
    }
}

/// 32-bit polynomial string hash over UTF-16 code units (`h = 31 * h + c`,
/// wrapping).
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0_i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

fn legacy_key(hash: i32) -> String {
    if hash < 0 {
        format!("0{}", hash.unsigned_abs())
    } else {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_string_hash() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("abc"), 96354);
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
        // Classic collision of the 32-bit hash.
        assert_eq!(string_hash("Aa"), string_hash("BB"));
    }

    #[test]
    fn test_key_legacy_encoding() {
        assert_eq!(legacy_key(5), "5");
        assert_eq!(legacy_key(-5), "05");
        assert_eq!(legacy_key(0), "0");
        assert_eq!(legacy_key(i32::MIN), "02147483648");
        let key = UniqueId::new(KeyScheme::LegacyHash, "INBOX", "<abc@host>");
        assert!(key.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_key_stable_and_folder_dependent() {
        for scheme in [KeyScheme::Uuid, KeyScheme::LegacyHash] {
            let a = UniqueId::new(scheme, "INBOX", "<abc@host>");
            let b = UniqueId::new(scheme, "INBOX", "<abc@host>");
            let c = UniqueId::new(scheme, "Archive", "<abc@host>");
            assert_eq!(a, b);
            assert_ne!(a, c);
        }
        let uuid = UniqueId::new(KeyScheme::Uuid, "INBOX", "<abc@host>");
        assert_eq!(uuid.as_str().len(), 36);
    }

    #[test]
    fn test_key_uuid_avoids_legacy_collision() {
        // "Aa" and "BB" hash alike and share the same prefix and suffix
        // lengths, so the legacy keys collide.
        let legacy_a = UniqueId::new(KeyScheme::LegacyHash, "Aa", "m");
        let legacy_b = UniqueId::new(KeyScheme::LegacyHash, "BB", "m");
        assert_eq!(legacy_a, legacy_b);
        let uuid_a = UniqueId::new(KeyScheme::Uuid, "Aa", "m");
        let uuid_b = UniqueId::new(KeyScheme::Uuid, "BB", "m");
        assert_ne!(uuid_a, uuid_b);
    }
}
