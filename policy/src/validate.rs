//! Write-time structural validation of entries

use crate::entry::{AccessControlEntry, AccessRestrictionEntry, Privilege, Target};
use core_types::{Status, SubjectId};
use identity::AuthMode;
use thiserror::Error;

/// Maximum subjects a single entry may carry
pub const MAX_SUBJECTS_PER_ENTRY: usize = 4;

/// Maximum targets a single entry may carry
pub const MAX_TARGETS_PER_ENTRY: usize = 3;

/// Structural violations; every variant is a permanent constraint error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Administer privilege requires CASE authentication, got {0}")]
    AdministerRequiresCase(AuthMode),

    #[error("Entry is not bound to a fabric")]
    MissingFabric,

    #[error("PASE access is implicit and cannot be stored")]
    PaseNotStorable,

    #[error("Target names no endpoint, cluster or device type")]
    EmptyTarget,

    #[error("Target names both an endpoint and a device type")]
    EndpointAndDeviceType,

    #[error("Subject {subject} is not valid under {auth_mode} authentication")]
    SubjectKindMismatch {
        subject: SubjectId,
        auth_mode: AuthMode,
    },

    #[error("Subject {0} is outside the operational range")]
    InvalidSubject(SubjectId),

    #[error("Too many subjects: {0} (max {MAX_SUBJECTS_PER_ENTRY})")]
    TooManySubjects(usize),

    #[error("Too many targets: {0} (max {MAX_TARGETS_PER_ENTRY})")]
    TooManyTargets(usize),

    #[error("CAT 0x{identifier:04X} version {version} is older than committed version {committed}")]
    StaleCatVersion {
        identifier: u16,
        version: u16,
        committed: u16,
    },
}

impl PolicyViolation {
    pub fn status(&self) -> Status {
        Status::ConstraintError
    }
}

/// Validates an ACE before it is accepted into any ACL
pub fn validate_ace(ace: &AccessControlEntry) -> Result<(), PolicyViolation> {
    if ace.privilege == Privilege::Administer && ace.auth_mode != AuthMode::Case {
        return Err(PolicyViolation::AdministerRequiresCase(ace.auth_mode));
    }
    if ace.auth_mode == AuthMode::Pase {
        return Err(PolicyViolation::PaseNotStorable);
    }
    if !ace.fabric_index.is_assigned() {
        return Err(PolicyViolation::MissingFabric);
    }
    if ace.subjects.len() > MAX_SUBJECTS_PER_ENTRY {
        return Err(PolicyViolation::TooManySubjects(ace.subjects.len()));
    }
    if ace.targets.len() > MAX_TARGETS_PER_ENTRY {
        return Err(PolicyViolation::TooManyTargets(ace.targets.len()));
    }
    for subject in &ace.subjects {
        validate_subject(subject)?;
        if matches!(subject, SubjectId::Group(_)) && ace.auth_mode != AuthMode::Group {
            return Err(PolicyViolation::SubjectKindMismatch {
                subject: *subject,
                auth_mode: ace.auth_mode,
            });
        }
        if matches!(subject, SubjectId::Node(_)) && ace.auth_mode == AuthMode::Group {
            return Err(PolicyViolation::SubjectKindMismatch {
                subject: *subject,
                auth_mode: ace.auth_mode,
            });
        }
    }
    ace.targets.iter().try_for_each(validate_target)
}

/// Validates an ARE before it is accepted into any ARL
pub fn validate_are(are: &AccessRestrictionEntry) -> Result<(), PolicyViolation> {
    if are.subjects.len() > MAX_SUBJECTS_PER_ENTRY {
        return Err(PolicyViolation::TooManySubjects(are.subjects.len()));
    }
    if are.targets.len() > MAX_TARGETS_PER_ENTRY {
        return Err(PolicyViolation::TooManyTargets(are.targets.len()));
    }
    are.subjects.iter().try_for_each(validate_subject)?;
    are.targets.iter().try_for_each(validate_target)
}

fn validate_subject(subject: &SubjectId) -> Result<(), PolicyViolation> {
    let valid = match subject {
        SubjectId::Node(node) => node.is_operational(),
        SubjectId::Cat(cat) => cat.is_valid(),
        SubjectId::Group(group) => group.is_valid(),
    };
    if valid {
        Ok(())
    } else {
        Err(PolicyViolation::InvalidSubject(*subject))
    }
}

fn validate_target(target: &Target) -> Result<(), PolicyViolation> {
    if target.is_empty() {
        return Err(PolicyViolation::EmptyTarget);
    }
    if target.endpoint.is_some() && target.device_type.is_some() {
        return Err(PolicyViolation::EndpointAndDeviceType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{
        CaseAuthTag, ClusterId, DeviceTypeId, EndpointId, FabricIndex, GroupId, NodeId,
    };
    use proptest::prelude::*;

    fn fabric() -> FabricIndex {
        FabricIndex::new(1)
    }

    #[test]
    fn test_administer_group_rejected() {
        let ace = AccessControlEntry::new(fabric(), Privilege::Administer, AuthMode::Group)
            .with_subject(CaseAuthTag::new(0x1010, 1));
        assert_eq!(
            validate_ace(&ace),
            Err(PolicyViolation::AdministerRequiresCase(AuthMode::Group))
        );
        assert_eq!(
            validate_ace(&ace).unwrap_err().status(),
            Status::ConstraintError
        );
    }

    #[test]
    fn test_administer_case_accepted() {
        let ace = AccessControlEntry::new(fabric(), Privilege::Administer, AuthMode::Case)
            .with_subject(NodeId::new(0x1122));
        assert!(validate_ace(&ace).is_ok());
    }

    #[test]
    fn test_pase_entry_rejected() {
        let ace = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Pase);
        assert_eq!(validate_ace(&ace), Err(PolicyViolation::PaseNotStorable));
    }

    #[test]
    fn test_fabric_required() {
        let ace = AccessControlEntry::new(FabricIndex::NONE, Privilege::View, AuthMode::Case);
        assert_eq!(validate_ace(&ace), Err(PolicyViolation::MissingFabric));
    }

    #[test]
    fn test_target_shape_rules() {
        let empty = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Case)
            .with_target(Target::default());
        assert_eq!(validate_ace(&empty), Err(PolicyViolation::EmptyTarget));

        let both = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Case).with_target(
            Target {
                endpoint: Some(EndpointId::new(1)),
                cluster: Some(ClusterId::ON_OFF),
                device_type: Some(DeviceTypeId::new(0x0100)),
            },
        );
        assert_eq!(
            validate_ace(&both),
            Err(PolicyViolation::EndpointAndDeviceType)
        );
    }

    #[test]
    fn test_group_subject_only_under_group_mode() {
        let ace = AccessControlEntry::new(fabric(), Privilege::Operate, AuthMode::Case)
            .with_subject(GroupId::new(0x0101));
        assert!(matches!(
            validate_ace(&ace),
            Err(PolicyViolation::SubjectKindMismatch { .. })
        ));

        let ace = AccessControlEntry::new(fabric(), Privilege::Operate, AuthMode::Group)
            .with_subject(GroupId::new(0x0101));
        assert!(validate_ace(&ace).is_ok());
    }

    #[test]
    fn test_reserved_node_id_rejected() {
        let ace = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Case)
            .with_subject(NodeId::new(0xFFFF_FFFD_0001_0001));
        assert!(matches!(
            validate_ace(&ace),
            Err(PolicyViolation::InvalidSubject(_))
        ));
    }

    #[test]
    fn test_zero_cat_version_rejected() {
        let ace = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Case)
            .with_subject(CaseAuthTag::new(0x1010, 0));
        assert!(matches!(
            validate_ace(&ace),
            Err(PolicyViolation::InvalidSubject(_))
        ));
    }

    #[test]
    fn test_entry_limits() {
        let mut ace = AccessControlEntry::new(fabric(), Privilege::View, AuthMode::Case);
        for n in 1..=5 {
            ace = ace.with_subject(NodeId::new(n));
        }
        assert_eq!(validate_ace(&ace), Err(PolicyViolation::TooManySubjects(5)));

        let mut are = AccessRestrictionEntry::restricting(1);
        for ep in 1..=4 {
            are = are.with_target(Target::endpoint(EndpointId::new(ep)));
        }
        assert_eq!(validate_are(&are), Err(PolicyViolation::TooManyTargets(4)));
    }

    fn any_auth_mode() -> impl Strategy<Value = AuthMode> {
        prop_oneof![
            Just(AuthMode::Pase),
            Just(AuthMode::Case),
            Just(AuthMode::Group)
        ]
    }

    proptest! {
        #[test]
        fn prop_administer_never_accepted_outside_case(
            mode in any_auth_mode(),
            identifier in any::<u16>(),
            version in 1u16..,
            endpoint in any::<u16>(),
        ) {
            let ace = AccessControlEntry::new(fabric(), Privilege::Administer, mode)
                .with_subject(CaseAuthTag::new(identifier, version))
                .with_target(Target::endpoint(EndpointId::new(endpoint)));
            let result = validate_ace(&ace);
            if mode == AuthMode::Case {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(PolicyViolation::AdministerRequiresCase(mode)));
            }
        }
    }
}
