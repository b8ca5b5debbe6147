//! Riff resolution state shared between the loader and observers

use std::sync::atomic::{AtomicU8, Ordering};

/// Resolution state of a riff
///
/// `Waiting -> Working -> {Failed | Success}`. Only `Success` riffs may be
/// played; both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SyncState {
    Waiting = 0,
    Working = 1,
    Failed = 2,
    Success = 3,
}

impl SyncState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncState::Working,
            2 => SyncState::Failed,
            3 => SyncState::Success,
            _ => SyncState::Waiting,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (SyncState::Waiting, SyncState::Working)
                | (SyncState::Working, SyncState::Failed)
                | (SyncState::Working, SyncState::Success)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Failed | SyncState::Success)
    }
}

/// Lock-free sync state, readable from any thread
#[derive(Debug)]
pub struct SyncStatus {
    state: AtomicU8,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SyncState::Waiting as u8),
        }
    }

    #[inline]
    pub fn get(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt `from -> to`; returns the state actually observed on failure
    pub(crate) fn transition(&self, from: SyncState, to: SyncState) -> Result<(), SyncState> {
        if !from.can_transition_to(to) {
            return Err(self.get());
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SyncState::from_u8)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let status = SyncStatus::new();
        assert_eq!(status.get(), SyncState::Waiting);
        assert!(status.transition(SyncState::Waiting, SyncState::Working).is_ok());
        assert!(status.transition(SyncState::Working, SyncState::Success).is_ok());
        assert_eq!(status.get(), SyncState::Success);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let status = SyncStatus::new();
        status.transition(SyncState::Waiting, SyncState::Working).unwrap();
        status.transition(SyncState::Working, SyncState::Failed).unwrap();
        assert_eq!(
            status.transition(SyncState::Failed, SyncState::Success),
            Err(SyncState::Failed)
        );
        assert!(SyncState::Failed.is_terminal());
    }

    #[test]
    fn test_skip_working_rejected() {
        let status = SyncStatus::new();
        assert_eq!(
            status.transition(SyncState::Waiting, SyncState::Success),
            Err(SyncState::Waiting)
        );
    }
}
