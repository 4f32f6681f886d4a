// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event-log replay.
//!
//! An envelope row is fully determined (modulo timestamps) by its event
//! sequence: the status is the one induced by the last status-inducing
//! event, and the failure counter is the number of `DOC_UPLOAD_FAILURE`
//! events. Replaying makes that derivation explicit so stores and tests can
//! check their rows against the log.

use crate::{EventKind, Status};

/// Envelope state derived purely from an event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedState {
    /// Status induced by the last status-inducing event, if any.
    pub status: Option<Status>,
    /// Number of `DOC_UPLOAD_FAILURE` events seen.
    pub upload_failure_count: u32,
}

/// Fold an event sequence into the state it induces.
///
/// The fold is total: it does not police transition legality (see
/// [`validate_trace`] for that), it only derives the row a legal log
/// produces.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a EventKind>) -> ReplayedState {
    let mut state = ReplayedState {
        status: None,
        upload_failure_count: 0,
    };
    for event in events {
        if let Some(next) = event.status() {
            state.status = Some(next);
        }
        if *event == EventKind::DocUploadFailure {
            state.upload_failure_count += 1;
        }
    }
    state
}

/// Check that an event sequence is a prefix of a legal path through the
/// envelope state machine.
///
/// A legal trace either begins with `ZIPFILE_PROCESSING_STARTED` (entering
/// `CREATED`) or consists of exactly one terminal failure event; every
/// later status-inducing event must traverse a permitted edge.
pub fn validate_trace<'a>(events: impl IntoIterator<Item = &'a EventKind>) -> bool {
    let mut current: Option<Status> = None;
    for event in events {
        let Some(next) = event.status() else { continue };
        match current {
            None => {
                // First transition must be an entry edge.
                if next != Status::Created && !next.is_terminal_failure() {
                    return false;
                }
            }
            Some(cur) => {
                if !cur.can_transition_to(next) {
                    return false;
                }
            }
        }
        current = Some(next);
    }
    true
}
