//! CASE Authenticated Tags and access control subjects
//!
//! A CAT occupies a reserved slice of the 64-bit node ID space:
//!
//! ```text
//!  63                32 31            16 15             0
//! +--------------------+----------------+----------------+
//! |     0xFFFFFFFD     |   identifier   |    version     |
//! +--------------------+----------------+----------------+
//! ```
//!
//! Both the identifier and the version are 16 bits wide. Version 0 is
//! invalid. Group node IDs use the `0xFFFF_FFFF_FFFF` prefix with the group
//! ID in the low 16 bits.

use crate::ids::{GroupId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const CAT_PREFIX: u64 = 0xFFFF_FFFD_0000_0000;
const CAT_PREFIX_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const GROUP_PREFIX: u64 = 0xFFFF_FFFF_FFFF_0000;
const GROUP_PREFIX_MASK: u64 = 0xFFFF_FFFF_FFFF_0000;

/// Errors decoding a subject
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatError {
    #[error("Not a CASE Authenticated Tag: 0x{0:016X}")]
    NotACat(u64),

    #[error("CAT version must be non-zero (identifier 0x{0:04X})")]
    ZeroVersion(u16),
}

/// A CASE Authenticated Tag
///
/// The identifier names a group of operational identities; the version
/// is bumped when membership changes, retiring holders of older versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseAuthTag {
    pub identifier: u16,
    pub version: u16,
}

impl CaseAuthTag {
    pub const fn new(identifier: u16, version: u16) -> Self {
        Self {
            identifier,
            version,
        }
    }

    /// Packs the tag into its 64-bit subject encoding
    pub const fn encode(&self) -> u64 {
        CAT_PREFIX | ((self.identifier as u64) << 16) | self.version as u64
    }

    /// Unpacks a 64-bit subject into a tag
    pub fn decode(raw: u64) -> Result<Self, CatError> {
        if !Self::is_cat(raw) {
            return Err(CatError::NotACat(raw));
        }
        let identifier = ((raw >> 16) & 0xFFFF) as u16;
        let version = (raw & 0xFFFF) as u16;
        if version == 0 {
            return Err(CatError::ZeroVersion(identifier));
        }
        Ok(Self::new(identifier, version))
    }

    /// Checks the CAT prefix only
    pub fn is_cat(raw: u64) -> bool {
        raw & CAT_PREFIX_MASK == CAT_PREFIX
    }

    pub fn is_valid(&self) -> bool {
        self.version != 0
    }

    /// Returns true if a session holding `held` satisfies this tag
    ///
    /// Identifiers must be equal and the held version must be at least
    /// this tag's version. Whether this tag's version is still current is
    /// decided by the caller against the committed version table.
    pub fn admits(&self, held: &CaseAuthTag) -> bool {
        self.identifier == held.identifier && held.version >= self.version
    }

    /// The same identifier at a different version
    pub fn with_version(&self, version: u16) -> Self {
        Self::new(self.identifier, version)
    }
}

impl fmt::Display for CaseAuthTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CAT(0x{:04X}, v{})", self.identifier, self.version)
    }
}

/// Subject of an access control or restriction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubjectId {
    Node(NodeId),
    Cat(CaseAuthTag),
    Group(GroupId),
}

impl SubjectId {
    /// Classifies a raw 64-bit subject
    pub fn from_raw(raw: u64) -> Result<Self, CatError> {
        if CaseAuthTag::is_cat(raw) {
            return CaseAuthTag::decode(raw).map(SubjectId::Cat);
        }
        if raw & GROUP_PREFIX_MASK == GROUP_PREFIX {
            return Ok(SubjectId::Group(GroupId::new((raw & 0xFFFF) as u16)));
        }
        Ok(SubjectId::Node(NodeId::new(raw)))
    }

    pub fn to_raw(&self) -> u64 {
        match self {
            SubjectId::Node(node) => node.raw(),
            SubjectId::Cat(cat) => cat.encode(),
            SubjectId::Group(group) => GROUP_PREFIX | group.raw() as u64,
        }
    }

    pub fn as_cat(&self) -> Option<&CaseAuthTag> {
        match self {
            SubjectId::Cat(cat) => Some(cat),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            SubjectId::Node(node) => Some(*node),
            _ => None,
        }
    }
}

impl From<NodeId> for SubjectId {
    fn from(node: NodeId) -> Self {
        SubjectId::Node(node)
    }
}

impl From<CaseAuthTag> for SubjectId {
    fn from(cat: CaseAuthTag) -> Self {
        SubjectId::Cat(cat)
    }
}

impl From<GroupId> for SubjectId {
    fn from(group: GroupId) -> Self {
        SubjectId::Group(group)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Node(node) => write!(f, "node {node}"),
            SubjectId::Cat(cat) => write!(f, "{cat}"),
            SubjectId::Group(group) => write!(f, "{group}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cat_encoding_layout() {
        let cat = CaseAuthTag::new(0x1010, 1);
        assert_eq!(cat.encode(), 0xFFFF_FFFD_1010_0001);
    }

    #[test]
    fn test_decode_rejects_non_cat() {
        assert_eq!(
            CaseAuthTag::decode(0x0000_0000_0000_1234),
            Err(CatError::NotACat(0x1234))
        );
    }

    #[test]
    fn test_decode_rejects_zero_version() {
        assert_eq!(
            CaseAuthTag::decode(0xFFFF_FFFD_ABCD_0000),
            Err(CatError::ZeroVersion(0xABCD))
        );
    }

    #[test]
    fn test_admits_respects_version_order() {
        let required = CaseAuthTag::new(0x1010, 2);
        assert!(required.admits(&CaseAuthTag::new(0x1010, 2)));
        assert!(required.admits(&CaseAuthTag::new(0x1010, 3)));
        assert!(!required.admits(&CaseAuthTag::new(0x1010, 1)));
        assert!(!required.admits(&CaseAuthTag::new(0x2020, 5)));
    }

    #[test]
    fn test_subject_classification() {
        assert_eq!(
            SubjectId::from_raw(0xFFFF_FFFD_0001_0002).unwrap(),
            SubjectId::Cat(CaseAuthTag::new(1, 2))
        );
        assert_eq!(
            SubjectId::from_raw(0xFFFF_FFFF_FFFF_0101).unwrap(),
            SubjectId::Group(GroupId::new(0x0101))
        );
        assert_eq!(
            SubjectId::from_raw(0x42).unwrap(),
            SubjectId::Node(NodeId::new(0x42))
        );
    }

    proptest! {
        #[test]
        fn prop_cat_encode_decode_inverse(identifier in any::<u16>(), version in 1u16..) {
            let cat = CaseAuthTag::new(identifier, version);
            prop_assert_eq!(CaseAuthTag::decode(cat.encode()), Ok(cat));
            prop_assert_eq!(SubjectId::from_raw(cat.encode()), Ok(SubjectId::Cat(cat)));
        }

        #[test]
        fn prop_operational_nodes_never_decode_as_cat(raw in 1u64..=NodeId::MAX_OPERATIONAL) {
            prop_assert!(!CaseAuthTag::is_cat(raw));
            prop_assert_eq!(SubjectId::from_raw(raw), Ok(SubjectId::Node(NodeId::new(raw))));
        }
    }
}
