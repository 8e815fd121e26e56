//! Phase state machine for a signing attempt and its projection
//!
//! ```text
//! Idle -> Probing -> Preparing -> Dispatching -> Reconciling -> Completed
//!            \__________\______________\_____________\______-> Failed
//! Completed | Failed -> Idle   (on acknowledgement)
//! ```
//!
//! Each transition is published on a `watch` channel as a [`ProgressSnapshot`].

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

pub const TOTAL_STEPS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Probing,
    Preparing,
    Dispatching,
    Reconciling,
    Completed,
    Failed,
}

impl Phase {
    /// Step counter shown next to the phase text
    pub fn step(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Probing => 1,
            Phase::Preparing => 2,
            Phase::Dispatching => 3,
            Phase::Reconciling | Phase::Completed => TOTAL_STEPS,
            Phase::Failed => 0,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Phase::Idle => "",
            Phase::Probing => "Checking the local signing agent",
            Phase::Preparing => "Preparing signature request",
            Phase::Dispatching => "Sending document to the signing agent",
            Phase::Reconciling => "Confirming signature with the server",
            Phase::Completed => "Signature completed",
            Phase::Failed => "Signature failed",
        }
    }

    /// Phases during which an attempt is running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Phase::Probing | Phase::Preparing | Phase::Dispatching | Phase::Reconciling
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn can_transition_to(&self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Idle, Phase::Probing)
            | (Phase::Probing, Phase::Preparing)
            | (Phase::Preparing, Phase::Dispatching)
            | (Phase::Dispatching, Phase::Reconciling)
            | (Phase::Reconciling, Phase::Completed) => true,
            (from, Phase::Failed) => from.is_active(),
            (from, Phase::Idle) => from.is_final(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Probing => "probing",
            Phase::Preparing => "preparing",
            Phase::Dispatching => "dispatching",
            Phase::Reconciling => "reconciling",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal progress transition {from} -> {to}")]
pub struct PhaseError {
    pub from: Phase,
    pub to: Phase,
}

/// What a progress display renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub step: u8,
    pub total_steps: u8,
    pub text: String,
    /// A modal should stay up until the attempt is acknowledged
    pub blocking: bool,
    pub detail: Option<String>,
}

impl ProgressSnapshot {
    fn at(phase: Phase, step: u8, detail: Option<String>) -> Self {
        Self {
            phase,
            step,
            total_steps: TOTAL_STEPS,
            text: phase.text().to_string(),
            blocking: phase != Phase::Idle,
            detail,
        }
    }

    pub fn idle() -> Self {
        Self::at(Phase::Idle, 0, None)
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Owns the current phase and broadcasts every change
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<ProgressSnapshot>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::idle());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    pub fn advance(&self, next: Phase) -> Result<(), PhaseError> {
        self.transition(next, None)
    }

    /// Move to `Failed`, keeping the step reached so far
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), PhaseError> {
        self.transition(Phase::Failed, Some(reason.into()))
    }

    /// Back to `Idle` once the caller has seen the final state
    pub fn acknowledge(&self) -> Result<(), PhaseError> {
        if self.phase() == Phase::Idle {
            return Ok(());
        }
        self.transition(Phase::Idle, None)
    }

    /// Replace the detail line without changing phase
    pub fn set_detail(&self, detail: impl Into<String>) {
        let detail = detail.into();
        self.tx.send_modify(|snapshot| snapshot.detail = Some(detail));
    }

    fn transition(&self, next: Phase, detail: Option<String>) -> Result<(), PhaseError> {
        let current = self.tx.borrow().clone();
        if !current.phase.can_transition_to(next) {
            return Err(PhaseError {
                from: current.phase,
                to: next,
            });
        }
        let step = match next {
            Phase::Failed => current.step,
            other => other.step(),
        };
        // The reconciling detail is the final tally
        let detail = match next {
            Phase::Completed => detail.or(current.detail),
            _ => detail,
        };
        debug!("Progress {} -> {}", current.phase, next);
        self.tx.send_replace(ProgressSnapshot::at(next, step, detail));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_happy_path_steps() {
        let tracker = ProgressTracker::new();
        let mut steps = Vec::new();
        for phase in [
            Phase::Probing,
            Phase::Preparing,
            Phase::Dispatching,
            Phase::Reconciling,
            Phase::Completed,
        ] {
            tracker.advance(phase).unwrap();
            let snapshot = tracker.current();
            assert!(snapshot.blocking);
            assert_eq!(snapshot.text, phase.text());
            steps.push(snapshot.step);
        }
        assert_eq!(steps, vec![1, 2, 3, 4, 4]);

        tracker.acknowledge().unwrap();
        assert_eq!(tracker.current(), ProgressSnapshot::idle());
        assert!(!tracker.current().blocking);
    }

    #[test]
    fn test_completion_keeps_final_detail() {
        let tracker = ProgressTracker::new();
        for phase in [
            Phase::Probing,
            Phase::Preparing,
            Phase::Dispatching,
            Phase::Reconciling,
        ] {
            tracker.advance(phase).unwrap();
        }
        tracker.set_detail("2 of 2 signed");
        tracker.advance(Phase::Completed).unwrap();

        let snapshot = tracker.current();
        assert_eq!(snapshot.phase, Phase::Completed);
        assert_eq!(snapshot.detail.as_deref(), Some("2 of 2 signed"));

        tracker.acknowledge().unwrap();
        assert_eq!(tracker.current().detail, None);
    }

    #[test]
    fn test_failure_keeps_reached_step() {
        let tracker = ProgressTracker::new();
        tracker.advance(Phase::Probing).unwrap();
        tracker.advance(Phase::Preparing).unwrap();
        tracker.fail("backend down").unwrap();

        let snapshot = tracker.current();
        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.step, 2);
        assert_eq!(snapshot.detail.as_deref(), Some("backend down"));
        assert!(snapshot.blocking);
    }

    #[test]
    fn test_guards_reject_skips_and_idle_failures() {
        let tracker = ProgressTracker::new();
        assert_eq!(
            tracker.advance(Phase::Dispatching),
            Err(PhaseError {
                from: Phase::Idle,
                to: Phase::Dispatching
            })
        );
        assert!(tracker.fail("nothing running").is_err());

        tracker.advance(Phase::Probing).unwrap();
        assert!(tracker.advance(Phase::Idle).is_err());
        assert!(tracker.advance(Phase::Completed).is_err());
    }

    #[test]
    fn test_final_phases_only_leave_to_idle() {
        assert!(!Phase::Completed.can_transition_to(Phase::Failed));
        assert!(!Phase::Failed.can_transition_to(Phase::Probing));
        assert!(Phase::Failed.can_transition_to(Phase::Idle));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.advance(Phase::Probing).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, Phase::Probing);

        tracker.set_detail("2 of 3 signed");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().detail.as_deref(), Some("2 of 3 signed"));
    }
}
