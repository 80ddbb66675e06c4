// Path request lifecycle states and their atomic cell

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// Lifecycle of a path request. Discriminants only ever increase along a
/// request's lifetime; no state is visited twice.
///
/// ```text
/// Created -> Queued -> Processing -> ReturnQueued -> Returning -> Returned
///                          |              ^
///                          +-> Errored ---+
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathState {
    Created = 0,
    Queued = 1,
    Processing = 2,
    Errored = 3,
    ReturnQueued = 4,
    Returning = 5,
    Returned = 6,
}

impl PathState {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PathState::Created,
            1 => PathState::Queued,
            2 => PathState::Processing,
            3 => PathState::Errored,
            4 => PathState::ReturnQueued,
            5 => PathState::Returning,
            _ => PathState::Returned,
        }
    }

    /// Whether `next` is the legal successor of `self`
    #[inline]
    pub fn can_advance_to(self, next: PathState) -> bool {
        use PathState::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Queued, Processing)
                | (Processing, Errored)
                | (Processing, ReturnQueued)
                | (Errored, ReturnQueued)
                | (ReturnQueued, Returning)
                | (Returning, Returned)
        )
    }

    /// Results are final and visible to the consumer
    #[inline]
    pub fn is_returned(self) -> bool {
        self == PathState::Returned
    }
}

/// How a search concluded, independent of the delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompleteState {
    #[default]
    NotCalculated,
    Complete,
    /// Target unreachable; path leads to the closest reachable node
    Partial,
    Error,
}

/// Lock-free state cell shared between the caller, a worker and the consumer
#[derive(Debug)]
pub struct AtomicPathState(AtomicU8);

impl Default for AtomicPathState {
    fn default() -> Self {
        Self(AtomicU8::new(PathState::Created as u8))
    }
}

impl AtomicPathState {
    #[inline]
    pub fn load(&self) -> PathState {
        PathState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is the legal successor of the current state.
    /// Returns the previous state. Of several threads racing for the same
    /// transition, exactly one succeeds.
    pub fn try_advance(&self, next: PathState) -> Result<PathState, PathError> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = PathState::from_u8(current);
            if !from.can_advance_to(next) {
                return Err(PathError::InvalidTransition { from, to: next });
            }

            match self
                .0
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_happy_path() {
        let state = AtomicPathState::default();
        for next in [
            PathState::Queued,
            PathState::Processing,
            PathState::ReturnQueued,
            PathState::Returning,
            PathState::Returned,
        ] {
            state.try_advance(next).unwrap();
        }
        assert!(state.load().is_returned());
    }

    #[test]
    fn test_errored_branch() {
        let state = AtomicPathState::default();
        state.try_advance(PathState::Queued).unwrap();
        state.try_advance(PathState::Processing).unwrap();
        assert_eq!(state.try_advance(PathState::Errored), Ok(PathState::Processing));
        assert_eq!(state.try_advance(PathState::ReturnQueued), Ok(PathState::Errored));
    }

    #[test]
    fn test_no_backwards_or_skipping() {
        let state = AtomicPathState::default();
        assert!(state.try_advance(PathState::Processing).is_err());
        assert!(state.try_advance(PathState::Created).is_err());

        state.try_advance(PathState::Queued).unwrap();
        assert_eq!(
            state.try_advance(PathState::Queued),
            Err(PathError::InvalidTransition {
                from: PathState::Queued,
                to: PathState::Queued
            })
        );
        assert_eq!(state.load(), PathState::Queued);
    }

    #[test]
    fn test_monotonic_order() {
        let all = [
            PathState::Created,
            PathState::Queued,
            PathState::Processing,
            PathState::Errored,
            PathState::ReturnQueued,
            PathState::Returning,
            PathState::Returned,
        ];
        for from in all {
            for to in all {
                if from.can_advance_to(to) {
                    assert!(to > from, "{from:?} -> {to:?} goes backwards");
                }
            }
        }
    }

    #[test]
    fn test_single_winner() {
        let state = Arc::new(AtomicPathState::default());
        state.try_advance(PathState::Queued).unwrap();
        state.try_advance(PathState::Processing).unwrap();

        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if state.try_advance(PathState::ReturnQueued).is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
