//! Access control and restriction entries

use core_types::{ClusterId, DeviceTypeId, EndpointId, FabricIndex, NodeId, SubjectId};
use identity::AuthMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Privilege levels, totally ordered
///
/// `View < Operate < Manage < Administer`. A grant at one level implies
/// every level below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Privilege {
    View,
    Operate,
    Manage,
    Administer,
}

impl Privilege {
    /// Returns true if holding `self` satisfies a requirement of `required`
    pub fn satisfies(&self, required: Privilege) -> bool {
        *self >= required
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::View => write!(f, "View"),
            Privilege::Operate => write!(f, "Operate"),
            Privilege::Manage => write!(f, "Manage"),
            Privilege::Administer => write!(f, "Administer"),
        }
    }
}

/// The data model location a request touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestPath {
    pub endpoint: EndpointId,
    pub cluster: ClusterId,
    /// Device type hosted on the endpoint, when known
    pub device_type: Option<DeviceTypeId>,
}

impl RequestPath {
    pub fn new(endpoint: EndpointId, cluster: ClusterId) -> Self {
        Self {
            endpoint,
            cluster,
            device_type: None,
        }
    }

    pub fn with_device_type(mut self, device_type: DeviceTypeId) -> Self {
        self.device_type = Some(device_type);
        self
    }
}

/// Target of an entry
///
/// Absent fields are wildcards. A valid target names at least one field
/// and never both an endpoint and a device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Target {
    pub endpoint: Option<EndpointId>,
    pub cluster: Option<ClusterId>,
    pub device_type: Option<DeviceTypeId>,
}

impl Target {
    pub fn endpoint(endpoint: EndpointId) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::default()
        }
    }

    pub fn cluster(cluster: ClusterId) -> Self {
        Self {
            cluster: Some(cluster),
            ..Self::default()
        }
    }

    pub fn device_type(device_type: DeviceTypeId) -> Self {
        Self {
            device_type: Some(device_type),
            ..Self::default()
        }
    }

    pub fn endpoint_cluster(endpoint: EndpointId, cluster: ClusterId) -> Self {
        Self {
            endpoint: Some(endpoint),
            cluster: Some(cluster),
            device_type: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.cluster.is_none() && self.device_type.is_none()
    }

    /// Checks whether a request path falls under this target
    pub fn matches(&self, path: &RequestPath) -> bool {
        self.endpoint.map_or(true, |ep| ep == path.endpoint)
            && self.cluster.map_or(true, |c| c == path.cluster)
            && self
                .device_type
                .map_or(true, |dt| path.device_type == Some(dt))
    }
}

/// Checks a target list against a path; an empty list matches everything
pub(crate) fn targets_match(targets: &[Target], path: &RequestPath) -> bool {
    targets.is_empty() || targets.iter().any(|t| t.matches(path))
}

/// Access Control Entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub fabric_index: FabricIndex,
    pub privilege: Privilege,
    pub auth_mode: AuthMode,
    /// Empty means any subject authenticated with `auth_mode`
    pub subjects: Vec<SubjectId>,
    /// Empty means every target on the node
    pub targets: Vec<Target>,
}

impl AccessControlEntry {
    pub fn new(fabric_index: FabricIndex, privilege: Privilege, auth_mode: AuthMode) -> Self {
        Self {
            fabric_index,
            privilege,
            auth_mode,
            subjects: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Adds a subject (builder pattern)
    pub fn with_subject(mut self, subject: impl Into<SubjectId>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    /// Adds a target (builder pattern)
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Returns true if the entry names `node` as a subject
    pub fn references_node(&self, node: NodeId) -> bool {
        self.subjects.contains(&SubjectId::Node(node))
    }

    pub fn covers(&self, path: &RequestPath) -> bool {
        targets_match(&self.targets, path)
    }
}

impl fmt::Display for AccessControlEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {} ({} subjects, {} targets)",
            self.auth_mode,
            self.privilege,
            self.fabric_index,
            self.subjects.len(),
            self.targets.len()
        )
    }
}

/// Access Restriction Entry
///
/// A restricting entry denies matching requests outright. An entry with
/// `restricted == false` is kept for bookkeeping and has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRestrictionEntry {
    pub entry_id: u32,
    /// Empty means every subject
    pub subjects: Vec<SubjectId>,
    /// Empty means every target
    pub targets: Vec<Target>,
    pub restricted: bool,
}

impl AccessRestrictionEntry {
    /// Creates a restricting entry
    pub fn restricting(entry_id: u32) -> Self {
        Self {
            entry_id,
            subjects: Vec::new(),
            targets: Vec::new(),
            restricted: true,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<SubjectId>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn references_node(&self, node: NodeId) -> bool {
        self.subjects.contains(&SubjectId::Node(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ep: u16, cluster: u32) -> RequestPath {
        RequestPath::new(EndpointId::new(ep), ClusterId::new(cluster))
    }

    #[test]
    fn test_privilege_total_order() {
        assert!(Privilege::View < Privilege::Operate);
        assert!(Privilege::Operate < Privilege::Manage);
        assert!(Privilege::Manage < Privilege::Administer);
        assert!(Privilege::Administer.satisfies(Privilege::View));
        assert!(!Privilege::View.satisfies(Privilege::Operate));
    }

    #[test]
    fn test_target_wildcards() {
        let on_off = path(1, ClusterId::ON_OFF.raw());
        assert!(Target::endpoint(EndpointId::new(1)).matches(&on_off));
        assert!(!Target::endpoint(EndpointId::new(2)).matches(&on_off));
        assert!(Target::cluster(ClusterId::ON_OFF).matches(&on_off));
        assert!(Target::endpoint_cluster(EndpointId::new(1), ClusterId::ON_OFF).matches(&on_off));
        assert!(
            !Target::endpoint_cluster(EndpointId::new(1), ClusterId::ACCESS_CONTROL)
                .matches(&on_off)
        );
    }

    #[test]
    fn test_device_type_target_requires_known_device_type() {
        let target = Target::device_type(DeviceTypeId::new(0x0100));
        let unknown = path(1, 6);
        assert!(!target.matches(&unknown));
        assert!(target.matches(&unknown.with_device_type(DeviceTypeId::new(0x0100))));
    }

    #[test]
    fn test_empty_target_list_is_wildcard() {
        let ace = AccessControlEntry::new(FabricIndex::new(1), Privilege::View, AuthMode::Case);
        assert!(ace.covers(&path(7, 0x1234)));
    }

    #[test]
    fn test_references_node() {
        let ace = AccessControlEntry::new(FabricIndex::new(1), Privilege::Operate, AuthMode::Case)
            .with_subject(NodeId::new(0x55));
        assert!(ace.references_node(NodeId::new(0x55)));
        assert!(!ace.references_node(NodeId::new(0x56)));
    }

    #[test]
    fn test_ace_serde_shape() {
        let ace = AccessControlEntry::new(FabricIndex::new(1), Privilege::Manage, AuthMode::Case)
            .with_target(Target::endpoint(EndpointId::new(1)));
        let json = serde_json::to_string(&ace).unwrap();
        let back: AccessControlEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ace);
    }
}
