use slidegrab_common::config::MotionConfig;
use tracing::{debug, info};

/// Where the scene stands relative to the last capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureState {
    /// Settled, but nothing has been captured yet for this run.
    #[default]
    SettledUncaptured,
    /// The current settled scene has been captured.
    CapturedSettled,
    /// The scene changed beyond `max_percent` since the last capture.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Capture,
    Hold,
}

impl CaptureState {
    /// Pure hysteresis step. Both comparisons are strict, so a signal sitting
    /// exactly on a threshold never moves the machine.
    pub fn transition(self, percent: f64, band: &MotionConfig) -> (CaptureState, StateAction) {
        match self {
            CaptureState::SettledUncaptured | CaptureState::Active
                if percent < band.min_percent() =>
            {
                (CaptureState::CapturedSettled, StateAction::Capture)
            }
            CaptureState::CapturedSettled if percent > band.max_percent() => {
                (CaptureState::Active, StateAction::Hold)
            }
            state => (state, StateAction::Hold),
        }
    }
}

/// Drives [`CaptureState`] over a run and numbers the captures.
pub struct CaptureStateMachine {
    state: CaptureState,
    band: MotionConfig,
    next_seq: u32,
    frames_observed: u64,
}

impl CaptureStateMachine {
    /// `band` is ordered by construction, see [`MotionConfig::new`].
    pub fn new(band: MotionConfig) -> Self {
        Self {
            state: CaptureState::default(),
            band,
            next_seq: 0,
            frames_observed: 0,
        }
    }

    /// Feed one frame's foreground percentage. Returns the sequence number
    /// to capture under, if this frame should be captured.
    pub fn observe(&mut self, percent: f64) -> Option<u32> {
        self.frames_observed += 1;
        let previous = self.state;
        let (next, action) = previous.transition(percent, &self.band);
        self.state = next;

        if previous != next && next == CaptureState::Active {
            info!(percent, "scene became active");
        }
        debug!(percent, state = ?next, frames_observed = self.frames_observed, "motion observed");

        match action {
            StateAction::Capture => {
                let seq = self.next_seq;
                self.next_seq += 1;
                Some(seq)
            }
            StateAction::Hold => None,
        }
    }

    pub fn current_state(&self) -> CaptureState {
        self.state
    }

    pub fn captures(&self) -> u32 {
        self.next_seq
    }

    pub fn frames_observed(&self) -> u64 {
        self.frames_observed
    }
}
