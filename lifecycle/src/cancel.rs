//! Cancellation and timeout primitives

use core_types::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Reason for cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    /// The node was removed from the fabric
    NodeRemoved,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::NodeRemoved => write!(f, "node removed"),
        }
    }
}

type SharedReason = Arc<Mutex<Option<CancellationReason>>>;

/// A cloneable token that can be checked for cancellation
///
/// Tokens are `Send + Sync`; a reconciliation thread checks its token
/// between steps while another thread cancels the source.
///
/// ## Example
///
/// ```
/// use lifecycle::{CancellationSource, CancellationReason};
///
/// let source = CancellationSource::new();
/// let token = source.token();
///
/// assert!(!token.is_cancelled());
///
/// source.cancel(CancellationReason::NodeRemoved);
/// assert!(token.is_cancelled());
/// assert_eq!(token.reason(), Some(CancellationReason::NodeRemoved));
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: SharedReason,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().is_some()
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.lock().clone()
    }
}

/// A controller that can trigger cancellation
///
/// The first cancellation wins; later calls keep the original reason.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    shared: SharedReason,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(None)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancels all tokens from this source
    pub fn cancel(&self, reason: CancellationReason) {
        let mut state = self.shared.lock();
        if state.is_none() {
            *state = Some(reason);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound on how long one node-facing apply may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn after(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// Returns true if an operation taking `elapsed` overran this timeout
    pub fn is_exceeded_by(&self, elapsed: Duration) -> bool {
        elapsed > self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_source_not_cancelled() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!source.is_cancelled());
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn test_first_cancel_sticks() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel(CancellationReason::NodeRemoved);
        source.cancel(CancellationReason::NodeRemoved);
        assert!(source.is_cancelled());
        assert_eq!(token.reason(), Some(CancellationReason::NodeRemoved));
        assert_eq!(token.reason().unwrap().to_string(), "node removed");
    }

    #[test]
    fn test_cancellation_crosses_threads() {
        let source = CancellationSource::new();
        let token = source.token();
        let worker = thread::spawn(move || {
            while !token.is_cancelled() {
                thread::yield_now();
            }
            token.reason()
        });
        source.cancel(CancellationReason::NodeRemoved);
        assert_eq!(worker.join().unwrap(), Some(CancellationReason::NodeRemoved));
    }

    #[test]
    fn test_timeout_exceeded() {
        let timeout = Timeout::from_millis(100);
        assert!(timeout.is_exceeded_by(Duration::from_millis(101)));
        assert!(!timeout.is_exceeded_by(Duration::from_millis(100)));
    }
}
