//! Admin List Tests
//!
//! At most one anchor administrator exists and it always sits at index 0,
//! whatever sequence of administrative operations is applied.

use core_types::{NodeId, Status};
use proptest::prelude::*;
use services_policy_store::{AdminEntry, AdminUpdate};
use tests_fabric::{case_session, test_bootstrap};

#[derive(Debug, Clone)]
enum AdminOp {
    Add { node: u64, anchor: bool },
    Update { node: u64, with_key: bool },
    Remove { node: u64 },
}

fn admin_op() -> impl Strategy<Value = AdminOp> {
    prop_oneof![
        (1u64..6, any::<bool>()).prop_map(|(node, anchor)| AdminOp::Add { node, anchor }),
        (1u64..6, any::<bool>())
            .prop_map(|(node, with_key)| AdminOp::Update { node, with_key }),
        (1u64..6).prop_map(|node| AdminOp::Remove { node }),
    ]
}

#[test]
fn test_admin_list_requires_administrator() {
    let f = test_bootstrap();
    let outsider = case_session(NodeId::new(0x42));
    let err = f
        .datastore
        .add_admin(&outsider, AdminEntry::new(NodeId::new(1), "ops"))
        .unwrap_err();
    assert_eq!(err.status(), Status::AccessDenied);
    assert!(f.datastore.admins().is_empty());
}

#[test]
fn test_anchor_can_be_replaced_after_removal() {
    let f = test_bootstrap();
    f.datastore
        .add_admin(&f.admin, AdminEntry::new(NodeId::new(1), "first").anchor())
        .unwrap();
    f.datastore.remove_admin(&f.admin, NodeId::new(1)).unwrap();
    f.datastore
        .add_admin(&f.admin, AdminEntry::new(NodeId::new(2), "second").anchor())
        .unwrap();

    let admins = f.datastore.admins();
    assert_eq!(admins.len(), 1);
    assert!(admins[0].is_anchor());
}

proptest! {
    #[test]
    fn prop_single_anchor_at_front(ops in proptest::collection::vec(admin_op(), 0..30)) {
        let f = test_bootstrap();
        for op in ops {
            let before = f.datastore.admins();
            let result = match op {
                AdminOp::Add { node, anchor } => {
                    let entry = AdminEntry::new(NodeId::new(node), "admin");
                    f.datastore
                        .add_admin(&f.admin, if anchor { entry.anchor() } else { entry })
                }
                AdminOp::Update { node, with_key } => {
                    let update = AdminUpdate {
                        friendly_name: Some("renamed".to_string()),
                        public_key: with_key.then(|| "04ff".to_string()),
                    };
                    f.datastore.update_admin(&f.admin, NodeId::new(node), update)
                }
                AdminOp::Remove { node } => f
                    .datastore
                    .remove_admin(&f.admin, NodeId::new(node))
                    .map(|_| ()),
            };
            let after = f.datastore.admins();
            if result.is_err() {
                prop_assert_eq!(&before, &after);
            }

            let anchors: Vec<usize> = after
                .iter()
                .enumerate()
                .filter(|(_, a)| a.is_anchor())
                .map(|(i, _)| i)
                .collect();
            prop_assert!(anchors.is_empty() || anchors == vec![0]);
        }
    }
}
