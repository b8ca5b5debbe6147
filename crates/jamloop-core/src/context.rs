//! Engine context - per-engine counters shared between threads
//!
//! Every id the core hands out (permutation requests, processor ids, riff ids)
//! comes from one [`EngineContext`], so two engines in the same process never
//! share counters and tests start from a known state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier returned by asynchronous operations (permutation requests, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

/// Number assigned to a submitted engine command
///
/// The first submitted command is 1. `completed >= n` means command `n` and
/// every command before it has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsyncCommandCounter(pub u64);

/// Shared counters for one engine instance
#[derive(Debug, Default)]
pub struct EngineContext {
    next_operation: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh operation id (starts at 1)
    pub fn next_operation_id(&self) -> OperationId {
        OperationId(self.next_operation.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Allocate the counter for a command about to be submitted
    pub(crate) fn next_command_counter(&self) -> AsyncCommandCounter {
        AsyncCommandCounter(self.submitted.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Number of counters handed out so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Completion watermark: every command numbered `<=` this has been applied
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Advance the completion watermark by one (audio thread only)
    #[inline]
    pub(crate) fn advance_completed(&self) {
        self.completed.fetch_add(1, Ordering::Release);
    }

    /// Whether the given command has been applied
    pub fn is_complete(&self, counter: AsyncCommandCounter) -> bool {
        self.completed() >= counter.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_per_context() {
        let a = EngineContext::new();
        let b = EngineContext::new();
        assert_eq!(a.next_operation_id(), OperationId(1));
        assert_eq!(a.next_operation_id(), OperationId(2));
        assert_eq!(b.next_operation_id(), OperationId(1));
    }

    #[test]
    fn test_command_counters() {
        let ctx = EngineContext::new();
        let first = ctx.next_command_counter();
        let second = ctx.next_command_counter();
        assert_eq!(first, AsyncCommandCounter(1));
        assert_eq!(second, AsyncCommandCounter(2));
        assert_eq!(ctx.submitted(), 2);
        assert!(!ctx.is_complete(first));

        ctx.advance_completed();
        assert!(ctx.is_complete(first));
        assert!(!ctx.is_complete(second));
    }
}
