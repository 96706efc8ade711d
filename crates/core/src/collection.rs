//! Per-API directory of live instances with full- and short-name lookup.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::name::Name;

/// A keyed directory of live instances for one API.
///
/// Entries are indexed by their full [`Name`] and by a bare local-name
/// shortcut. Two full names sharing a local name (e.g. `remote1:foo` and
/// `remote2:foo`) poison the shortcut until one of them is removed, at
/// which point it is re-established — lookup results never depend on
/// insertion order.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    resources: HashMap<Name, T>,
    /// Bare local name → unique owner, or `None` when ambiguous.
    shortcuts: HashMap<String, Option<Name>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            resources: HashMap::new(),
            shortcuts: HashMap::new(),
        }
    }
}

impl<T> Collection<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact lookup, falling back to the shortcut table. Ambiguous
    /// shortcuts resolve to nothing.
    pub fn resource(&self, name: &Name) -> Result<&T> {
        if let Some(res) = self.resources.get(name) {
            return Ok(res);
        }
        if let Some(Some(full)) = self.shortcuts.get(&name.short_name())
            && let Some(res) = self.resources.get(full)
        {
            return Ok(res);
        }
        Err(Error::NotFound { name: name.clone() })
    }

    /// Insert an entry under its full name and register its shortcut.
    ///
    /// Fails on an empty local name, or when the new entry's short form
    /// collides with a different entry's full path. A shortcut already
    /// claimed by a different full name is poisoned rather than stolen.
    pub fn add(&mut self, name: Name, resource: T) -> Result<()> {
        if name.name.is_empty() {
            return Err(Error::InvalidName {
                name: name.to_string(),
                reason: "local name must not be empty".to_string(),
            });
        }
        let short = name.short_name();
        if self
            .resources
            .keys()
            .any(|existing| existing != &name && existing.short_name() == short)
        {
            return Err(Error::InvalidName {
                name: name.to_string(),
                reason: format!("short name \"{short}\" collides with an existing entry"),
            });
        }

        self.resources.insert(name.clone(), resource);
        let shortcut = name.shortest_name();
        match self.shortcuts.get(&shortcut) {
            Some(Some(existing)) if existing != &name => {
                // Second owner of this local name: mark ambiguous.
                self.shortcuts.insert(shortcut, None);
            }
            Some(_) => {}
            None => {
                self.shortcuts.insert(shortcut, Some(name));
            }
        }
        Ok(())
    }

    /// Remove an entry and repair the shortcut table: if exactly one
    /// remaining entry shares the local name, it regains the shortcut.
    pub fn remove(&mut self, name: &Name) -> Option<T> {
        let removed = self.resources.remove(name)?;

        let mut sharing = self
            .resources
            .keys()
            .filter(|candidate| candidate.name == name.name);
        match (sharing.next(), sharing.next()) {
            (None, _) => {
                self.shortcuts.remove(&name.name);
            }
            (Some(survivor), None) => {
                self.shortcuts
                    .insert(name.shortest_name(), Some(survivor.clone()));
            }
            // Still ambiguous.
            (Some(_), Some(_)) => {}
        }
        Some(removed)
    }

    /// Atomically rebuild both maps from `entries`.
    pub fn replace_all(&mut self, entries: HashMap<Name, T>) {
        let mut shortcuts: HashMap<String, Option<Name>> = HashMap::new();
        for name in entries.keys() {
            shortcuts
                .entry(name.shortest_name())
                .and_modify(|slot| *slot = None)
                .or_insert_with(|| Some(name.clone()));
        }
        self.resources = entries;
        self.shortcuts = shortcuts;
    }

    #[must_use]
    pub fn contains(&self, name: &Name) -> bool {
        self.resources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &T)> {
        self.resources.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
