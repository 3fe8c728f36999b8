//! Connection lifecycle for each side of a transfer.
//!
//! ```text
//! sender:   Idle -> Connecting -> MetadataSent -> BodySending -> Complete
//! receiver: Listening -> Connected -> MetadataPending -> BodyPending -> Complete
//! ```
//!
//! `Aborted` is reachable from every state except `Complete` and is final.
//! A new attempt starts from a fresh session.

use std::fmt::Debug;

use tracing::debug;

use crate::error::TransferError;

/// A lifecycle with a linear happy path and a single failure sink
pub trait Lifecycle: Copy + Debug + PartialEq {
    const ABORTED: Self;

    /// Whether moving from `self` to `next` is legal
    fn can_advance_to(self, next: Self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Connecting,
    MetadataSent,
    BodySending,
    Complete,
    Aborted,
}

impl Lifecycle for SenderState {
    const ABORTED: Self = SenderState::Aborted;

    fn can_advance_to(self, next: Self) -> bool {
        use SenderState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, MetadataSent)
                | (MetadataSent, BodySending)
                | (BodySending, Complete)
                | (Idle | Connecting | MetadataSent | BodySending, Aborted)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Listening,
    Connected,
    MetadataPending,
    BodyPending,
    Complete,
    Aborted,
}

impl Lifecycle for ReceiverState {
    const ABORTED: Self = ReceiverState::Aborted;

    fn can_advance_to(self, next: Self) -> bool {
        use ReceiverState::*;
        matches!(
            (self, next),
            (Listening, Connected)
                | (Connected, MetadataPending)
                | (MetadataPending, BodyPending)
                | (BodyPending, Complete)
                | (Listening | Connected | MetadataPending | BodyPending, Aborted)
        )
    }
}

/// Current state of one session, logging every transition
#[derive(Debug)]
pub struct StateTracker<S: Lifecycle> {
    role: &'static str,
    state: S,
}

impl<S: Lifecycle> StateTracker<S> {
    pub fn new(role: &'static str, initial: S) -> Self {
        Self { role, state: initial }
    }

    pub fn current(&self) -> S {
        self.state
    }

    pub fn advance(&mut self, next: S) {
        debug_assert!(
            self.state.can_advance_to(next),
            "{} cannot move from {:?} to {:?}",
            self.role,
            self.state,
            next
        );
        debug!(role = self.role, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }

    /// Move to `Aborted` after `err`. No-op once complete or already aborted.
    pub fn abort(&mut self, err: &TransferError) {
        if self.state.can_advance_to(S::ABORTED) {
            debug!(role = self.role, from = ?self.state, error = %err, "aborting");
            self.state = S::ABORTED;
        }
    }
}
