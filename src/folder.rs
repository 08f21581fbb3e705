//
// mailmirror - folders
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

//! Folder records and the folder hierarchy.
//!
//! Folders are kept in an arena keyed by full name. Parents and children are
//! not stored: they are looked up through full name prefixes, so renaming or
//! removing a subtree only touches the arena keys.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    hash::{Hash, Hasher},
};

use crate::error::{Error, ErrorKind, Result};

/// Message counts of a folder at the time it was read.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FolderCounts {
    pub total: usize,
    pub new: usize,
    pub unread: usize,
    pub deleted: usize,
}

impl FolderCounts {
    /// Messages not flagged as deleted.
    pub fn live(&self) -> usize {
        self.total.saturating_sub(self.deleted)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Folder {
    pub name: String,
    pub full_name: String,
    pub counts: FolderCounts,
}

impl Folder {
    pub fn new<S: Into<String>>(full_name: S, separator: char) -> Self {
        let full_name = full_name.into();
        let name = full_name
            .rsplit_once(separator)
            .map_or(full_name.as_str(), |(_, name)| name)
            .to_string();
        Self {
            name,
            full_name,
            counts: FolderCounts::default(),
        }
    }

    pub fn with_counts(mut self, counts: FolderCounts) -> Self {
        self.counts = counts;
        self
    }

    pub fn parent_name(&self, separator: char) -> Option<&str> {
        parent_name(&self.full_name, separator)
    }
}

impl PartialEq for Folder {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name
    }
}

impl Eq for Folder {}

impl PartialOrd for Folder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Folder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.full_name.cmp(&other.full_name)
    }
}

impl Hash for Folder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_name.hash(state);
    }
}

pub fn parent_name(full_name: &str, separator: char) -> Option<&str> {
    full_name.rsplit_once(separator).map(|(parent, _)| parent)
}

/// Replaces the `old` prefix of `full_name` with `new`, if `full_name` is
/// `old` or one of its descendants.
pub fn rebase(full_name: &str, old: &str, new: &str, separator: char) -> Option<String> {
    if full_name == old {
        return Some(new.to_string());
    }
    let rest = full_name.strip_prefix(old)?;
    if rest.starts_with(separator) {
        Some(format!("{}{}", new, rest))
    } else {
        None
    }
}

#[derive(Clone, Debug)]
pub struct FolderTree {
    separator: char,
    folders: BTreeMap<String, Folder>,
}

impl FolderTree {
    pub fn new(separator: char) -> Self {
        Self {
            separator,
            folders: BTreeMap::new(),
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn insert(&mut self, folder: Folder) -> Option<Folder> {
        self.folders.insert(folder.full_name.clone(), folder)
    }

    pub fn get(&self, full_name: &str) -> Option<&Folder> {
        self.folders.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.folders.contains_key(full_name)
    }

    pub fn update_counts(&mut self, full_name: &str, counts: FolderCounts) -> bool {
        self.folders
            .get_mut(full_name)
            .map(|f| f.counts = counts)
            .is_some()
    }

    pub fn parent(&self, full_name: &str) -> Option<&Folder> {
        parent_name(full_name, self.separator).and_then(|p| self.folders.get(p))
    }

    /// Folders without a parent in the tree.
    pub fn roots(&self) -> Vec<&Folder> {
        self.folders
            .values()
            .filter(|f| self.parent(&f.full_name).is_none())
            .collect()
    }

    /// Every folder below `full_name`, at any depth, in full name order.
    pub fn descendants(&self, full_name: &str) -> Vec<&Folder> {
        let prefix = format!("{}{}", full_name, self.separator);
        self.folders
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, f)| f)
            .collect()
    }

    pub fn children(&self, full_name: &str) -> Vec<&Folder> {
        let depth = full_name.len() + self.separator.len_utf8();
        self.descendants(full_name)
            .into_iter()
            .filter(|f| !f.full_name[depth..].contains(self.separator))
            .collect()
    }

    /// Full names of `full_name` and its descendants, depth first with
    /// children before their parent.
    pub fn post_order(&self, full_name: &str) -> Vec<String> {
        fn rec(tree: &FolderTree, full_name: &str, out: &mut Vec<String>) {
            for child in tree.children(full_name) {
                rec(tree, &child.full_name, out);
            }
            out.push(full_name.to_string());
        }
        let mut ret = vec![];
        rec(self, full_name, &mut ret);
        ret
    }

    /// Removes a folder and all its descendants.
    pub fn remove_subtree(&mut self, full_name: &str) -> Vec<Folder> {
        let mut names: Vec<String> = self
            .descendants(full_name)
            .into_iter()
            .map(|f| f.full_name.clone())
            .collect();
        names.push(full_name.to_string());
        names
            .into_iter()
            .filter_map(|name| self.folders.remove(&name))
            .collect()
    }

    /// Renames a folder and all its descendants, returning the `(old, new)`
    /// full names of every moved folder, parents first.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<Vec<(String, String)>> {
        if !self.folders.contains_key(old) {
            return Err(Error::new(format!("Folder `{}` does not exist.", old))
                .set_kind(ErrorKind::NotFound));
        }
        if self.folders.contains_key(new) {
            return Err(Error::new(format!("Folder `{}` already exists.", new))
                .set_kind(ErrorKind::ValueError));
        }
        if rebase(new, old, new, self.separator).is_some() && new != old {
            return Err(Error::new(format!(
                "Folder `{}` cannot be moved inside itself as `{}`.",
                old, new
            ))
            .set_kind(ErrorKind::ValueError));
        }
        let mut moved = vec![];
        for folder in self.remove_subtree(old) {
            let Some(new_name) = rebase(&folder.full_name, old, new, self.separator) else {
                continue;
            };
            moved.push((folder.full_name.clone(), new_name.clone()));
            self.insert(Folder::new(new_name, self.separator).with_counts(folder.counts));
        }
        moved.sort_by_key(|(old_name, _)| old_name.matches(self.separator).count());
        Ok(moved)
    }
}
