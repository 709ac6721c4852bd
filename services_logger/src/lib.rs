//! # Logger Service
//!
//! This crate implements the append-only audit trail of the fabric
//! datastore.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! Every state transition that changes who may do what on which node is
//! recorded as a typed event, chained by digest so that edits are
//! detectable, and mirrored to `tracing` for operators.

use core_types::{GroupId, Instant, KeySetId, NodeId, Status};
use lifecycle::{RecordId, RecordType};
use policy::DenyReason;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

/// Audited transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    RecordCommitted {
        node: NodeId,
        record: RecordId,
        kind: RecordType,
    },
    RecordRemoved {
        node: NodeId,
        record: RecordId,
        kind: RecordType,
    },
    RecordCommitFailed {
        node: NodeId,
        record: RecordId,
        kind: RecordType,
        status: Status,
        retries: u32,
    },
    RetryScheduled {
        node: NodeId,
        record: RecordId,
        attempt: u32,
        next_attempt: Instant,
    },
    /// An entry granting `subject` privilege on `node` was revoked
    PrivilegeRevoked {
        node: NodeId,
        subject: NodeId,
        kind: RecordType,
    },
    ReconciliationCancelled {
        node: NodeId,
        dropped: usize,
    },
    NodeAdded {
        node: NodeId,
    },
    NodeCommitted {
        node: NodeId,
    },
    NodeCommitFailed {
        node: NodeId,
    },
    NodeRemovalStarted {
        node: NodeId,
        revocations: usize,
    },
    NodeRemoved {
        node: NodeId,
    },
    AdminAdded {
        node: NodeId,
        anchor: bool,
    },
    AdminUpdated {
        node: NodeId,
    },
    AdminRemoved {
        node: NodeId,
    },
    KeySetAdded {
        key_set: KeySetId,
    },
    KeySetRemoved {
        key_set: KeySetId,
    },
    GroupAdded {
        group: GroupId,
    },
    GroupUpdated {
        group: GroupId,
    },
    GroupRemoved {
        group: GroupId,
    },
    CatVersionCommitted {
        identifier: u16,
        version: u16,
    },
    /// An administrative command was refused
    AdministrationDenied {
        reason: DenyReason,
        /// Restricting entries that matched, by entry ID
        restrictions: Vec<u32>,
        /// Number of datastore ACEs that matched the caller and target
        matched_entries: usize,
    },
}

impl AuditEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            AuditEvent::RecordCommitFailed { .. } | AuditEvent::NodeCommitFailed { .. } => {
                LogLevel::Error
            }
            AuditEvent::RetryScheduled { .. }
            | AuditEvent::ReconciliationCancelled { .. }
            | AuditEvent::AdministrationDenied { .. } => LogLevel::Warn,
            AuditEvent::RecordCommitted { .. } | AuditEvent::RecordRemoved { .. } => {
                LogLevel::Debug
            }
            _ => LogLevel::Info,
        }
    }

    /// Node the event concerns, if any
    pub fn node(&self) -> Option<NodeId> {
        match self {
            AuditEvent::RecordCommitted { node, .. }
            | AuditEvent::RecordRemoved { node, .. }
            | AuditEvent::RecordCommitFailed { node, .. }
            | AuditEvent::RetryScheduled { node, .. }
            | AuditEvent::PrivilegeRevoked { node, .. }
            | AuditEvent::ReconciliationCancelled { node, .. }
            | AuditEvent::NodeAdded { node }
            | AuditEvent::NodeCommitted { node }
            | AuditEvent::NodeCommitFailed { node }
            | AuditEvent::NodeRemovalStarted { node, .. }
            | AuditEvent::NodeRemoved { node }
            | AuditEvent::AdminAdded { node, .. }
            | AuditEvent::AdminUpdated { node }
            | AuditEvent::AdminRemoved { node } => Some(*node),
            _ => None,
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::RecordCommitted { node, kind, .. } => {
                write!(f, "{} record committed on {}", kind, node)
            }
            AuditEvent::RecordRemoved { node, kind, .. } => {
                write!(f, "{} record removed from {}", kind, node)
            }
            AuditEvent::RecordCommitFailed {
                node,
                kind,
                status,
                retries,
                ..
            } => write!(
                f,
                "{} record failed on {}: {} after {} attempts",
                kind, node, status, retries
            ),
            AuditEvent::RetryScheduled { node, attempt, .. } => {
                write!(f, "retry {} scheduled for {}", attempt, node)
            }
            AuditEvent::PrivilegeRevoked {
                node,
                subject,
                kind,
            } => write!(f, "{} privilege of {} revoked on {}", kind, subject, node),
            AuditEvent::ReconciliationCancelled { node, dropped } => {
                write!(f, "reconciliation of {} cancelled ({} dropped)", node, dropped)
            }
            AuditEvent::NodeAdded { node } => write!(f, "node {} added", node),
            AuditEvent::NodeCommitted { node } => write!(f, "node {} committed", node),
            AuditEvent::NodeCommitFailed { node } => write!(f, "node {} commit failed", node),
            AuditEvent::NodeRemovalStarted { node, revocations } => {
                write!(f, "removal of {} started ({} revocations)", node, revocations)
            }
            AuditEvent::NodeRemoved { node } => write!(f, "node {} removed", node),
            AuditEvent::AdminAdded { node, anchor } => {
                write!(f, "admin {} added (anchor: {})", node, anchor)
            }
            AuditEvent::AdminUpdated { node } => write!(f, "admin {} updated", node),
            AuditEvent::AdminRemoved { node } => write!(f, "admin {} removed", node),
            AuditEvent::KeySetAdded { key_set } => write!(f, "{} added", key_set),
            AuditEvent::KeySetRemoved { key_set } => write!(f, "{} removed", key_set),
            AuditEvent::GroupAdded { group } => write!(f, "{} added", group),
            AuditEvent::GroupUpdated { group } => write!(f, "{} updated", group),
            AuditEvent::GroupRemoved { group } => write!(f, "{} removed", group),
            AuditEvent::CatVersionCommitted {
                identifier,
                version,
            } => write!(f, "CAT 0x{:04X} committed at v{}", identifier, version),
            AuditEvent::AdministrationDenied {
                reason,
                restrictions,
                matched_entries,
            } => write!(
                f,
                "administrative command denied: {:?} ({} restrictions, {} entries matched)",
                reason,
                restrictions.len(),
                matched_entries
            ),
        }
    }
}

/// One entry of the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub timestamp: Instant,
    pub event: AuditEvent,
    /// Digest of the previous record, empty for the first
    pub prev_digest: String,
    /// SHA-256 over `prev_digest` and this record's body
    pub digest: String,
}

#[derive(Serialize)]
struct RecordBody<'a> {
    sequence: u64,
    timestamp: Instant,
    event: &'a AuditEvent,
}

fn compute_digest(prev_digest: &str, sequence: u64, timestamp: Instant, event: &AuditEvent) -> String {
    let body = RecordBody {
        sequence,
        timestamp,
        event,
    };
    let mut hasher = Sha256::new();
    hasher.update(prev_digest.as_bytes());
    // Serializing a derived enum into memory cannot fail
    hasher.update(serde_json::to_vec(&body).unwrap_or_default());
    hex::encode(hasher.finalize())
}

/// Chain verification failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence: u64,
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit chain broken at record {}", self.sequence)
    }
}

/// Append-only, hash-chained audit trail
///
/// Shared by the sync engine and the datastore; appends are serialized
/// internally.
#[derive(Debug, Default)]
pub struct AuditTrail {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and mirrors it to `tracing`
    pub fn record(&self, timestamp: Instant, event: AuditEvent) -> u64 {
        match event.level() {
            LogLevel::Debug => debug!(at_ms = timestamp.as_millis(), "{}", event),
            LogLevel::Info => info!(at_ms = timestamp.as_millis(), "{}", event),
            LogLevel::Warn => warn!(at_ms = timestamp.as_millis(), "{}", event),
            LogLevel::Error => error!(at_ms = timestamp.as_millis(), "{}", event),
        }

        let mut records = self.records.lock();
        let sequence = records.len() as u64;
        let prev_digest = records
            .last()
            .map(|r| r.digest.clone())
            .unwrap_or_default();
        let digest = compute_digest(&prev_digest, sequence, timestamp, &event);
        records.push(AuditRecord {
            sequence,
            timestamp,
            event,
            prev_digest,
            digest,
        });
        sequence
    }

    /// Returns all recorded events
    pub fn events(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Returns events matching a predicate
    pub fn find_events<F>(&self, predicate: F) -> Vec<AuditRecord>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.records
            .lock()
            .iter()
            .filter(|r| predicate(&r.event))
            .cloned()
            .collect()
    }

    /// Checks if any event matches a predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.records.lock().iter().any(|r| predicate(&r.event))
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.records
            .lock()
            .iter()
            .filter(|r| predicate(&r.event))
            .count()
    }

    /// Position of the first event matching a predicate
    pub fn position<F>(&self, predicate: F) -> Option<u64>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.records
            .lock()
            .iter()
            .find(|r| predicate(&r.event))
            .map(|r| r.sequence)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Recomputes every digest and checks the links
    pub fn verify_chain(&self) -> Result<(), ChainBreak> {
        verify_records(&self.records.lock())
    }
}

/// Verifies a sequence of records exported from a trail
pub fn verify_records(records: &[AuditRecord]) -> Result<(), ChainBreak> {
    let mut prev = String::new();
    for (position, record) in records.iter().enumerate() {
        let expected = compute_digest(&prev, record.sequence, record.timestamp, &record.event);
        if record.sequence != position as u64 || record.prev_digest != prev || record.digest != expected
        {
            return Err(ChainBreak {
                sequence: position as u64,
            });
        }
        prev = record.digest.clone();
    }
    Ok(())
}
