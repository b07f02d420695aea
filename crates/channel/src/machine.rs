//! Per-channel step state machine.

use storjdemo_protocol::StepKind;

use crate::error::ChannelError;

/// Where a channel stands in its step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState<S> {
    /// The channel accepts exactly this step next.
    Expecting(S),
    Closed,
}

/// Transition table of a channel kind.
///
/// Returns the state after `incoming` completes with a response, or `None`
/// if `incoming` is not allowed in `state`.
pub fn transition<S: StepKind>(state: ChannelState<S>, incoming: S) -> Option<ChannelState<S>> {
    match state {
        ChannelState::Expecting(expected) if expected == incoming => Some(
            incoming
                .successor()
                .map_or(ChannelState::Closed, ChannelState::Expecting),
        ),
        _ => None,
    }
}

/// Tracks the expected step of one channel.
///
/// Any violation closes the machine for good.
#[derive(Debug)]
pub struct StepMachine<S: StepKind> {
    state: ChannelState<S>,
}

impl<S: StepKind> Default for StepMachine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StepKind> StepMachine<S> {
    pub fn new() -> Self {
        Self {
            state: S::first().map_or(ChannelState::Closed, ChannelState::Expecting),
        }
    }

    pub fn state(&self) -> ChannelState<S> {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }

    /// Checks that the step named `name` is the one the channel expects.
    pub fn accept(&mut self, name: &str) -> Result<S, ChannelError> {
        let expected = match self.state {
            ChannelState::Expecting(s) => s,
            ChannelState::Closed => {
                return Err(ChannelError::ProtocolViolation(format!(
                    "{} channel is closed, got step {name:?}",
                    S::CHANNEL
                )));
            }
        };

        let Some(step) = S::from_name(name) else {
            self.state = ChannelState::Closed;
            return Err(ChannelError::ProtocolViolation(format!(
                "unknown {} step {name:?}",
                S::CHANNEL
            )));
        };

        if transition(self.state, step).is_none() {
            self.state = ChannelState::Closed;
            return Err(ChannelError::ProtocolViolation(format!(
                "{} channel expected step {}, got {}",
                S::CHANNEL,
                expected.name(),
                step.name()
            )));
        }

        Ok(step)
    }

    /// Records that `step` finished. A step that produced no response
    /// closes the channel.
    pub fn complete(&mut self, step: S, responded: bool) {
        self.state = match (responded, transition(self.state, step)) {
            (true, Some(next)) => next,
            _ => ChannelState::Closed,
        };
    }

    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storjdemo_protocol::{ChallengeStep, HandoffStep};

    #[test]
    fn handoff_runs_in_order_then_closes() {
        let mut m = StepMachine::<HandoffStep>::new();
        assert_eq!(m.state(), ChannelState::Expecting(HandoffStep::Request));

        for step in HandoffStep::ORDER {
            let accepted = m.accept(step.name()).unwrap();
            assert_eq!(accepted, *step);
            m.complete(accepted, true);
        }
        assert!(m.is_closed());
    }

    #[test]
    fn handoff_rejects_every_step_before_its_predecessor() {
        for step in [HandoffStep::AcceptFiles, HandoffStep::ReportDownloaded] {
            let mut m = StepMachine::<HandoffStep>::new();
            let err = m.accept(step.name()).unwrap_err();
            assert!(matches!(err, ChannelError::ProtocolViolation(_)));
            assert!(m.is_closed());
        }

        let mut m = StepMachine::<HandoffStep>::new();
        let s = m.accept("request").unwrap();
        m.complete(s, true);
        assert!(m.accept("report_downloaded").is_err());
        assert!(m.is_closed());
    }

    #[test]
    fn challenge_rejects_result_before_proof() {
        let mut m = StepMachine::<ChallengeStep>::new();
        let err = m.accept("receive_result").unwrap_err();
        assert_eq!(err.code(), 400);
        assert!(m.is_closed());
    }

    #[test]
    fn repeated_step_is_a_violation() {
        let mut m = StepMachine::<ChallengeStep>::new();
        let s = m.accept("send_proof").unwrap();
        m.complete(s, true);
        assert!(m.accept("send_proof").is_err());
    }

    #[test]
    fn unknown_step_name_is_a_violation() {
        let mut m = StepMachine::<HandoffStep>::new();
        assert!(m.accept("seqAA_request").is_err());
        assert!(m.is_closed());
    }

    #[test]
    fn no_response_closes_early() {
        let mut m = StepMachine::<HandoffStep>::new();
        let s = m.accept("request").unwrap();
        m.complete(s, false);
        assert!(m.is_closed());
        assert!(m.accept("accept_files").is_err());
    }

    #[test]
    fn transition_table_only_allows_expected_step() {
        use ChannelState::*;
        assert_eq!(
            transition(Expecting(ChallengeStep::SendProof), ChallengeStep::SendProof),
            Some(Expecting(ChallengeStep::ReceiveResult))
        );
        assert_eq!(
            transition(
                Expecting(ChallengeStep::ReceiveResult),
                ChallengeStep::ReceiveResult
            ),
            Some(Closed)
        );
        assert_eq!(
            transition(Expecting(ChallengeStep::SendProof), ChallengeStep::ReceiveResult),
            None
        );
        assert_eq!(transition(Closed, ChallengeStep::SendProof), None);
    }
}
