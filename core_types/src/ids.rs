//! Identifiers for fabric entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational node identifier
///
/// Node IDs share a 64-bit space with CASE Authenticated Tags and group node
/// IDs. Only the operational range may name a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Highest operational node ID; everything above is reserved
    pub const MAX_OPERATIONAL: u64 = 0xFFFF_FFEF_FFFF_FFFF;

    /// Creates a node ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Checks if this ID lies in the operational range
    pub fn is_operational(&self) -> bool {
        self.0 != 0 && self.0 <= Self::MAX_OPERATIONAL
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Index of a fabric in a node's fabric table
///
/// Zero means "no fabric" and is only valid for sessions that have not
/// completed commissioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FabricIndex(u8);

impl FabricIndex {
    /// Placeholder index used before a fabric is assigned
    pub const NONE: FabricIndex = FabricIndex(0);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Returns true if a real fabric is referenced
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fabric:{}", self.0)
    }
}

/// Endpoint on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(u16);

impl EndpointId {
    /// The root endpoint hosting node-wide clusters
    pub const ROOT: EndpointId = EndpointId(0);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Cluster identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(u32);

impl ClusterId {
    pub const ON_OFF: ClusterId = ClusterId(0x0006);
    pub const ACCESS_CONTROL: ClusterId = ClusterId(0x001F);
    pub const GROUP_KEY_MANAGEMENT: ClusterId = ClusterId(0x003F);
    pub const JOINT_FABRIC_DATASTORE: ClusterId = ClusterId(0x0752);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster:0x{:04X}", self.0)
    }
}

/// Device type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceTypeId(u32);

impl DeviceTypeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "devtype:0x{:04X}", self.0)
    }
}

/// Group identifier
///
/// Group 0 is reserved and never names a real group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u16);

impl GroupId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Returns true for any non-reserved group
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:0x{:04X}", self.0)
    }
}

/// Group key set identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeySetId(u16);

/// The Identity Protection Key always lives in key set 0
pub const IPK_KEY_SET_ID: KeySetId = KeySetId(0);

impl KeySetId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Checks if this is the IPK key set, which can never be removed
    pub fn is_ipk(&self) -> bool {
        *self == IPK_KEY_SET_ID
    }
}

impl fmt::Display for KeySetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyset:{}", self.0)
    }
}
