//! ACL lookup index keyed by `(endpoint, subject)`

use crate::entry::AccessControlEntry;
use core_types::{EndpointId, GroupId, NodeId, SubjectId};
use std::collections::{BTreeSet, HashMap};

/// Subject half of an index key
///
/// CATs are keyed by identifier only; version scoping is left to the
/// full match so the index never decides on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubjectKey {
    Any,
    Node(NodeId),
    Cat(u16),
    Group(GroupId),
}

impl From<&SubjectId> for SubjectKey {
    fn from(subject: &SubjectId) -> Self {
        match subject {
            SubjectId::Node(node) => SubjectKey::Node(*node),
            SubjectId::Cat(cat) => SubjectKey::Cat(cat.identifier),
            SubjectId::Group(group) => SubjectKey::Group(*group),
        }
    }
}

/// Narrows the ACEs worth evaluating for a request
///
/// `None` endpoint buckets hold entries whose targets do not pin an
/// endpoint. Candidates are a superset of the entries that can match, in
/// ACL order, so a decision over candidates equals a decision over the
/// full list.
#[derive(Debug, Clone, Default)]
pub struct AclIndex {
    buckets: HashMap<(Option<EndpointId>, SubjectKey), Vec<usize>>,
    len: usize,
}

impl AclIndex {
    pub fn build(acl: &[AccessControlEntry]) -> Self {
        let mut buckets: HashMap<(Option<EndpointId>, SubjectKey), Vec<usize>> = HashMap::new();
        for (i, ace) in acl.iter().enumerate() {
            let mut endpoints: BTreeSet<Option<EndpointId>> =
                ace.targets.iter().map(|t| t.endpoint).collect();
            if endpoints.is_empty() {
                endpoints.insert(None);
            }
            let subjects: Vec<SubjectKey> = if ace.subjects.is_empty() {
                vec![SubjectKey::Any]
            } else {
                ace.subjects.iter().map(SubjectKey::from).collect()
            };
            for endpoint in &endpoints {
                for subject in &subjects {
                    buckets.entry((*endpoint, *subject)).or_default().push(i);
                }
            }
        }
        Self {
            buckets,
            len: acl.len(),
        }
    }

    /// ACL positions that may match a request on `endpoint` by `held`
    pub fn candidates(&self, endpoint: EndpointId, held: &[SubjectId]) -> Vec<usize> {
        let mut keys = vec![SubjectKey::Any];
        keys.extend(held.iter().map(SubjectKey::from));

        let mut found = BTreeSet::new();
        for bucket in [Some(endpoint), None] {
            for key in &keys {
                if let Some(entries) = self.buckets.get(&(bucket, *key)) {
                    found.extend(entries.iter().copied());
                }
            }
        }
        found.into_iter().collect()
    }

    /// Number of ACEs the index was built from
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
