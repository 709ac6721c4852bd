//! Access decision engine

use crate::cat_versions::CatVersionTable;
use crate::entry::{targets_match, AccessControlEntry, AccessRestrictionEntry, Privilege, RequestPath};
use crate::index::AclIndex;
use core_types::{Status, SubjectId};
use identity::{AuthMode, SessionContext};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request to be authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub path: RequestPath,
    pub required: Privilege,
}

impl AccessRequest {
    pub fn new(path: RequestPath, required: Privilege) -> Self {
        Self { path, required }
    }
}

/// Read-only policy state a decision is evaluated against
///
/// Borrowed from a committed snapshot; the engine never mutates it.
#[derive(Debug, Clone, Copy)]
pub struct PolicyView<'a> {
    pub acl: &'a [AccessControlEntry],
    pub arl: &'a [AccessRestrictionEntry],
    pub cat_versions: &'a CatVersionTable,
    pub index: Option<&'a AclIndex>,
}

impl<'a> PolicyView<'a> {
    pub fn new(
        acl: &'a [AccessControlEntry],
        arl: &'a [AccessRestrictionEntry],
        cat_versions: &'a CatVersionTable,
    ) -> Self {
        Self {
            acl,
            arl,
            cat_versions,
            index: None,
        }
    }

    /// Uses a prebuilt index for ACE lookup
    ///
    /// The index must have been built from the same `acl` slice.
    pub fn with_index(mut self, index: &'a AclIndex) -> Self {
        self.index = Some(index);
        self
    }
}

/// What granted an allowed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grant {
    /// A stored ACE, by position in the ACL
    Entry { index: usize, privilege: Privilege },
    /// The commissioning window's synthetic Administer grant
    ImplicitPase,
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    /// A restricting ARE matched
    Restricted { entry_id: u32 },
    /// The session has been closed
    SessionClosed,
    /// No ACE matched the subject, auth mode, fabric and target
    NoMatchingEntry,
    /// Entries matched but none grants enough privilege
    InsufficientPrivilege { best: Privilege },
}

/// Outcome of an access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Allow { grant: Grant },
    Deny { reason: DenyReason },
}

impl AccessDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    /// Maps the decision onto an interaction status
    pub fn to_status(&self) -> Status {
        match self {
            Self::Allow { .. } => Status::Success,
            Self::Deny { .. } => Status::AccessDenied,
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow {
                grant: Grant::ImplicitPase,
            } => write!(f, "Allow (commissioning window)"),
            Self::Allow {
                grant: Grant::Entry { index, privilege },
            } => write!(f, "Allow ({} via entry {})", privilege, index),
            Self::Deny {
                reason: DenyReason::Restricted { entry_id },
            } => write!(f, "Deny: restricted by entry {}", entry_id),
            Self::Deny {
                reason: DenyReason::SessionClosed,
            } => write!(f, "Deny: session closed"),
            Self::Deny {
                reason: DenyReason::NoMatchingEntry,
            } => write!(f, "Deny: no matching entry"),
            Self::Deny {
                reason: DenyReason::InsufficientPrivilege { best },
            } => write!(f, "Deny: best grant is {}", best),
        }
    }
}

/// How CAT versions are compared when matching subjects
#[derive(Debug, Clone, Copy)]
pub enum CatScope<'a> {
    /// Grants: the entry's version must also be the committed one or newer
    Committed(&'a CatVersionTable),
    /// Restrictions: any holder at or above the entry's version matches
    AnyVersion,
}

/// Matches one entry subject against one subject held by the session
///
/// This is the only place CAT subjects are compared.
pub fn subject_matches(entry: &SubjectId, held: &SubjectId, scope: CatScope<'_>) -> bool {
    match (entry, held) {
        (SubjectId::Node(a), SubjectId::Node(b)) => a == b,
        (SubjectId::Group(a), SubjectId::Group(b)) => a == b,
        (SubjectId::Cat(required), SubjectId::Cat(held)) => {
            required.admits(held)
                && match scope {
                    CatScope::Committed(table) => table.is_current(required),
                    CatScope::AnyVersion => true,
                }
        }
        _ => false,
    }
}

fn subjects_match(entry_subjects: &[SubjectId], session: &SessionContext, scope: CatScope<'_>) -> bool {
    entry_subjects.is_empty()
        || entry_subjects
            .iter()
            .any(|e| session.subjects().iter().any(|h| subject_matches(e, h, scope)))
}

/// Full explanation of a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReport {
    pub decision: AccessDecision,
    /// Restricting entries that matched, by entry ID
    pub matched_restrictions: Vec<u32>,
    /// ACEs that matched subject, mode, fabric and target, by ACL position
    pub matched_entries: Vec<usize>,
}

/// The access decision engine
///
/// Evaluation order:
/// 1. A closed session is denied.
/// 2. Any matching restricting ARE denies.
/// 3. A live PASE session holds Administer over the whole node.
/// 4. ACEs with the session's auth mode and fabric, a matching subject and
///    a matching target are scanned; the request is allowed if any grants
///    at least the required privilege.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessDecisionEngine;

impl AccessDecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decides a request. Pure and side-effect free.
    pub fn decide(
        &self,
        view: &PolicyView<'_>,
        session: &SessionContext,
        request: &AccessRequest,
    ) -> AccessDecision {
        if !session.is_live() {
            return AccessDecision::Deny {
                reason: DenyReason::SessionClosed,
            };
        }
        if let Some(entry_id) = self.restrictions(view, session, request).next() {
            return AccessDecision::Deny {
                reason: DenyReason::Restricted { entry_id },
            };
        }
        if session.auth_mode() == AuthMode::Pase {
            return AccessDecision::Allow {
                grant: Grant::ImplicitPase,
            };
        }

        let mut best: Option<Privilege> = None;
        for index in self.matching_entries(view, session, request) {
            let privilege = view.acl[index].privilege;
            if privilege.satisfies(request.required) {
                return AccessDecision::Allow {
                    grant: Grant::Entry { index, privilege },
                };
            }
            best = best.max(Some(privilege));
        }

        let reason = match best {
            Some(best) => DenyReason::InsufficientPrivilege { best },
            None => DenyReason::NoMatchingEntry,
        };
        AccessDecision::Deny { reason }
    }

    /// Decides a request and records which entries took part
    pub fn decide_with_report(
        &self,
        view: &PolicyView<'_>,
        session: &SessionContext,
        request: &AccessRequest,
    ) -> DecisionReport {
        DecisionReport {
            decision: self.decide(view, session, request),
            matched_restrictions: self.restrictions(view, session, request).collect(),
            matched_entries: self.matching_entries(view, session, request).collect(),
        }
    }

    pub fn name(&self) -> &str {
        "AccessDecisionEngine"
    }

    fn restrictions<'v>(
        &self,
        view: &PolicyView<'v>,
        session: &'v SessionContext,
        request: &'v AccessRequest,
    ) -> impl Iterator<Item = u32> + 'v {
        view.arl
            .iter()
            .filter(move |are| {
                are.restricted
                    && subjects_match(&are.subjects, session, CatScope::AnyVersion)
                    && targets_match(&are.targets, &request.path)
            })
            .map(|are| are.entry_id)
    }

    fn matching_entries<'v>(
        &self,
        view: &PolicyView<'v>,
        session: &'v SessionContext,
        request: &'v AccessRequest,
    ) -> impl Iterator<Item = usize> + 'v {
        let acl = view.acl;
        let scope = CatScope::Committed(view.cat_versions);
        let candidates: Vec<usize> = match view.index {
            Some(index) => index.candidates(request.path.endpoint, session.subjects()),
            None => (0..acl.len()).collect(),
        };
        candidates.into_iter().filter(move |&i| {
            let ace = &acl[i];
            ace.auth_mode == session.auth_mode()
                && ace.fabric_index == session.fabric_index()
                && subjects_match(&ace.subjects, session, scope)
                && ace.covers(&request.path)
        })
    }
}
