//! Committed CAT versions

use crate::entry::AccessControlEntry;
use crate::validate::PolicyViolation;
use core_types::CaseAuthTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Most recently committed version of every known CAT identifier
///
/// An ACE naming a CAT grants privilege only while its version is at
/// least the committed one. Bumping the committed version retires every
/// ACE scoped to an older version in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatVersionTable {
    committed: BTreeMap<u16, u16>,
}

impl CatVersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a table from the highest version each identifier has in an ACL
    pub fn from_acl(acl: &[AccessControlEntry]) -> Self {
        let mut table = Self::new();
        for cat in acl.iter().flat_map(|ace| ace.subjects.iter()).filter_map(|s| s.as_cat()) {
            let entry = table.committed.entry(cat.identifier).or_insert(cat.version);
            *entry = (*entry).max(cat.version);
        }
        table
    }

    /// Records `cat` as the committed version for its identifier
    ///
    /// Versions only move forward; re-committing the current version is a no-op.
    pub fn commit(&mut self, cat: CaseAuthTag) -> Result<(), PolicyViolation> {
        match self.committed.get(&cat.identifier) {
            Some(&current) if cat.version < current => Err(PolicyViolation::StaleCatVersion {
                identifier: cat.identifier,
                version: cat.version,
                committed: current,
            }),
            _ => {
                self.committed.insert(cat.identifier, cat.version);
                Ok(())
            }
        }
    }

    pub fn committed(&self, identifier: u16) -> Option<u16> {
        self.committed.get(&identifier).copied()
    }

    /// Returns true if an entry naming `cat` still carries privilege
    ///
    /// Identifiers with no committed version are unconstrained.
    pub fn is_current(&self, cat: &CaseAuthTag) -> bool {
        self.committed(cat.identifier)
            .map_or(true, |committed| cat.version >= committed)
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
