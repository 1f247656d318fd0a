//! In-memory folder hierarchy.
//!
//! Storage keeps only a parent pointer per folder, so nothing below this layer
//! stops a folder from becoming its own ancestor. Every move goes through
//! [`FolderArena::check_move`] first.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use super::model::{Folder, FolderNode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FolderError {
    #[error("folder '{0}' does not exist")]
    Unknown(String),

    #[error("moving folder '{folder}' under '{parent}' would create a cycle")]
    Cycle { folder: String, parent: String },
}

#[derive(Debug, Clone, Default)]
pub struct FolderArena {
    folders: BTreeMap<String, Folder>,
}

impl FolderArena {
    #[must_use]
    pub fn from_folders(folders: impl IntoIterator<Item = Folder>) -> Self {
        Self {
            folders: folders.into_iter().map(|f| (f.id.clone(), f)).collect(),
        }
    }

    pub fn insert(&mut self, folder: Folder) {
        self.folders.insert(folder.id.clone(), folder);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Folder> {
        self.folders.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Ancestors of `id`, nearest first. Stops at a dangling parent pointer, and
    /// at the first repeat if stored data already contains a loop.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut current = self.folders.get(id).and_then(|f| f.parent_id.as_deref());
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            let Some(folder) = self.folders.get(parent) else {
                break;
            };
            out.push(folder.id.as_str());
            current = folder.parent_id.as_deref();
        }
        out
    }

    /// Direct children of `parent` (`None` for the top level), by sort order then name.
    #[must_use]
    pub fn children(&self, parent: Option<&str>) -> Vec<&Folder> {
        let mut out: Vec<&Folder> = self
            .folders
            .values()
            .filter(|f| match (parent, f.parent_id.as_deref()) {
                (None, None) => true,
                (None, Some(p)) => !self.folders.contains_key(p),
                (Some(want), Some(p)) => want == p,
                (Some(_), None) => false,
            })
            .collect();
        out.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Zero for top-level folders.
    #[must_use]
    pub fn depth(&self, id: &str) -> usize {
        self.ancestors(id).len()
    }

    #[must_use]
    pub fn would_cycle(&self, id: &str, new_parent: Option<&str>) -> bool {
        match new_parent {
            None => false,
            Some(parent) => parent == id || self.ancestors(parent).contains(&id),
        }
    }

    /// # Errors
    /// [`FolderError::Unknown`] for a missing folder or parent, [`FolderError::Cycle`]
    /// when `id` would end up below itself.
    pub fn check_move(&self, id: &str, new_parent: Option<&str>) -> Result<(), FolderError> {
        if !self.folders.contains_key(id) {
            return Err(FolderError::Unknown(id.to_owned()));
        }
        if let Some(parent) = new_parent {
            if !self.folders.contains_key(parent) {
                return Err(FolderError::Unknown(parent.to_owned()));
            }
            if self.would_cycle(id, new_parent) {
                return Err(FolderError::Cycle {
                    folder: id.to_owned(),
                    parent: parent.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// # Errors
    /// Same as [`Self::check_move`]; the arena is unchanged on error.
    pub fn apply_move(&mut self, id: &str, new_parent: Option<&str>) -> Result<(), FolderError> {
        self.check_move(id, new_parent)?;
        if let Some(folder) = self.folders.get_mut(id) {
            folder.parent_id = new_parent.map(str::to_owned);
        }
        Ok(())
    }

    #[must_use]
    pub fn tree(&self) -> Vec<FolderNode> {
        self.children(None)
            .into_iter()
            .map(|f| self.node(f, &mut BTreeSet::new()))
            .collect()
    }

    fn node<'a>(&'a self, folder: &'a Folder, path: &mut BTreeSet<&'a str>) -> FolderNode {
        path.insert(folder.id.as_str());
        let mut children = Vec::new();
        for child in self.children(Some(&folder.id)) {
            if !path.contains(child.id.as_str()) {
                children.push(self.node(child, path));
            }
        }
        path.remove(folder.id.as_str());
        FolderNode {
            folder: folder.clone(),
            children,
        }
    }
}
