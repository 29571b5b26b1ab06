//! Session state and phase transitions, free of any I/O.
//!
//! The controller owns at most one [`TrackingSession`] and turns the
//! [`Step`]s returned here into timer, subscription and downstream effects.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetwatch_core::{Imo, SessionId};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PrimaryWait,
    GraceWait,
    Terminating,
}

impl Phase {
    /// Phases in which updates are accumulated and the stream is supervised.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::PrimaryWait | Self::GraceWait)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PrimaryWait => "primary_wait",
            Self::GraceWait => "grace_wait",
            Self::Terminating => "terminating",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Primary window ended with at least one update.
    PrimaryWindowElapsed,
    /// First update arrived during the grace window.
    GraceUpdate,
    /// Grace window ended without any update.
    GraceWindowElapsed,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryWindowElapsed => "primary_window_elapsed",
            Self::GraceUpdate => "grace_update",
            Self::GraceWindowElapsed => "grace_window_elapsed",
        }
    }
}

/// Result of a finished session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    /// IMOs sent in the continuation request. Empty means no request was made.
    pub reported: Vec<Imo>,
    pub reason: TerminationReason,
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of the controller, served by the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub seen: Vec<Imo>,
    pub candidates: Vec<Imo>,
    #[serde(skip)]
    pub deadline: Option<Instant>,
    pub remaining_ms: Option<u64>,
    pub subscribed: bool,
    pub reconnect_attempts: u32,
    pub last_outcome: Option<SessionOutcome>,
}

/// What the controller must do after feeding the session a trigger.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Trigger did not apply to this session.
    Ignored,
    /// Update recorded; `fresh` is false for a repeat IMO.
    Accumulated { fresh: bool },
    /// Primary window ended empty; arm the grace timer.
    EnterGrace { deadline: Instant },
    /// Session is over; report these IMOs.
    Terminate {
        reported: Vec<Imo>,
        reason: TerminationReason,
    },
}

pub(crate) struct TrackingSession {
    id: SessionId,
    phase: Phase,
    seen: BTreeSet<Imo>,
    /// Empty means every vessel counts.
    candidates: BTreeSet<Imo>,
    deadline: Instant,
}

impl TrackingSession {
    pub(crate) fn begin(candidates: Vec<Imo>, now: Instant, primary_window: Duration) -> Self {
        Self {
            id: SessionId::new(),
            phase: Phase::PrimaryWait,
            seen: BTreeSet::new(),
            candidates: candidates.into_iter().collect(),
            deadline: now + primary_window,
        }
    }

    pub(crate) fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn seen(&self) -> Vec<Imo> {
        self.seen.iter().copied().collect()
    }

    pub(crate) fn candidates(&self) -> Vec<Imo> {
        self.candidates.iter().copied().collect()
    }

    fn is_candidate(&self, imo: Imo) -> bool {
        self.candidates.is_empty() || self.candidates.contains(&imo)
    }

    /// An update arrived for `imo`.
    pub(crate) fn record(&mut self, imo: Imo) -> Step {
        if !self.phase.is_waiting() || !self.is_candidate(imo) {
            return Step::Ignored;
        }

        let fresh = self.seen.insert(imo);
        if self.phase == Phase::GraceWait {
            // Any update during grace ends the session right away, reporting only this vessel.
            self.phase = Phase::Terminating;
            return Step::Terminate {
                reported: vec![imo],
                reason: TerminationReason::GraceUpdate,
            };
        }

        Step::Accumulated { fresh }
    }

    /// The timer for the current phase fired at `now`.
    pub(crate) fn deadline_elapsed(&mut self, now: Instant, grace_window: Duration) -> Step {
        match self.phase {
            Phase::PrimaryWait if !self.seen.is_empty() => {
                self.phase = Phase::Terminating;
                Step::Terminate {
                    reported: self.seen(),
                    reason: TerminationReason::PrimaryWindowElapsed,
                }
            }
            Phase::PrimaryWait => {
                self.phase = Phase::GraceWait;
                self.deadline = now + grace_window;
                Step::EnterGrace {
                    deadline: self.deadline,
                }
            }
            Phase::GraceWait => {
                self.phase = Phase::Terminating;
                Step::Terminate {
                    reported: self.seen(),
                    reason: TerminationReason::GraceWindowElapsed,
                }
            }
            Phase::Idle | Phase::Terminating => Step::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: Duration = Duration::from_millis(100);
    const GRACE: Duration = Duration::from_millis(50);

    fn session(candidates: &[u64]) -> (TrackingSession, Instant) {
        let now = Instant::now();
        let candidates = candidates.iter().copied().map(Imo).collect();
        (TrackingSession::begin(candidates, now, PRIMARY), now)
    }

    #[test]
    fn begins_in_primary_wait() {
        let (s, now) = session(&[]);
        assert_eq!(s.phase(), Phase::PrimaryWait);
        assert_eq!(s.deadline(), now + PRIMARY);
        assert!(s.seen().is_empty());
    }

    #[test]
    fn primary_elapsed_with_updates_reports_whole_set() {
        let (mut s, now) = session(&[]);
        assert_eq!(s.record(Imo(30)), Step::Accumulated { fresh: true });
        assert_eq!(s.record(Imo(10)), Step::Accumulated { fresh: true });
        assert_eq!(s.record(Imo(30)), Step::Accumulated { fresh: false });

        let step = s.deadline_elapsed(now + PRIMARY, GRACE);
        assert_eq!(
            step,
            Step::Terminate {
                reported: vec![Imo(10), Imo(30)],
                reason: TerminationReason::PrimaryWindowElapsed,
            }
        );
        assert_eq!(s.phase(), Phase::Terminating);
    }

    #[test]
    fn empty_primary_enters_grace_with_fresh_deadline() {
        let (mut s, now) = session(&[]);
        let fired = now + PRIMARY;

        assert_eq!(
            s.deadline_elapsed(fired, GRACE),
            Step::EnterGrace {
                deadline: fired + GRACE
            }
        );
        assert_eq!(s.phase(), Phase::GraceWait);
        assert!(s.seen().is_empty());
    }

    #[test]
    fn grace_update_terminates_with_only_that_vessel() {
        let (mut s, now) = session(&[]);
        s.deadline_elapsed(now + PRIMARY, GRACE);

        assert_eq!(
            s.record(Imo(9074729)),
            Step::Terminate {
                reported: vec![Imo(9074729)],
                reason: TerminationReason::GraceUpdate,
            }
        );
        // Anything after that is too late.
        assert_eq!(s.record(Imo(1)), Step::Ignored);
    }

    #[test]
    fn grace_elapsed_reports_empty_set() {
        let (mut s, now) = session(&[]);
        s.deadline_elapsed(now + PRIMARY, GRACE);

        assert_eq!(
            s.deadline_elapsed(now + PRIMARY + GRACE, GRACE),
            Step::Terminate {
                reported: Vec::new(),
                reason: TerminationReason::GraceWindowElapsed,
            }
        );
    }

    #[test]
    fn non_candidates_are_ignored() {
        let (mut s, now) = session(&[7]);
        assert_eq!(s.record(Imo(8)), Step::Ignored);
        assert!(s.seen().is_empty());

        s.deadline_elapsed(now + PRIMARY, GRACE);
        assert_eq!(s.record(Imo(8)), Step::Ignored);
        assert_eq!(s.phase(), Phase::GraceWait);
        assert!(matches!(s.record(Imo(7)), Step::Terminate { .. }));
    }

    #[test]
    fn terminating_session_ignores_timers() {
        let (mut s, now) = session(&[]);
        s.record(Imo(1));
        s.deadline_elapsed(now + PRIMARY, GRACE);
        assert_eq!(s.deadline_elapsed(now + PRIMARY * 2, GRACE), Step::Ignored);
    }

    #[test]
    fn phase_and_reason_strings() {
        assert_eq!(Phase::GraceWait.as_str(), "grace_wait");
        assert_eq!(TerminationReason::GraceUpdate.as_str(), "grace_update");
        assert_eq!(
            serde_json::to_value(Phase::PrimaryWait).unwrap(),
            serde_json::json!("primary_wait")
        );
    }
}
