use super::StateMachine;
use crate::error::ErrorCode;

/// Where a call sits in its send / close-send / done lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Outbound messages are still accepted.
    Open,
    /// Close-send ran; inbound delivery continues.
    HalfClosed,
    /// The terminal callback has been scheduled with this code. Irreversible.
    Terminal(ErrorCode),
}

/// The per-call lifecycle.
///
/// Every caller request is answered with exactly one output:
/// [`Admitted`](LifecycleOutput::Admitted) or [`Rejected`](LifecycleOutput::Rejected).
/// A finish request produces [`Finished`](LifecycleOutput::Finished) only the first time,
/// which is what makes completion exactly-once.
#[derive(Debug)]
pub struct LifecycleMachine {
    state: StreamState,
    admitted_sends: u64,
    pending: Option<LifecycleOutput>,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self {
            state: StreamState::Open,
            admitted_sends: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn admitted_sends(&self) -> u64 {
        self.admitted_sends
    }

    fn admit_send(&mut self) {
        self.pending = Some(match self.state {
            StreamState::Open => {
                self.admitted_sends += 1;
                LifecycleOutput::Admitted
            }
            StreamState::HalfClosed => LifecycleOutput::Rejected(ErrorCode::SendAfterClose),
            StreamState::Terminal(_) => LifecycleOutput::Rejected(ErrorCode::UnknownHandle),
        });
    }

    fn close_send(&mut self) {
        self.pending = Some(match self.state {
            StreamState::Open => {
                self.state = StreamState::HalfClosed;
                LifecycleOutput::Admitted
            }
            StreamState::HalfClosed => LifecycleOutput::Rejected(ErrorCode::AlreadyClosed),
            StreamState::Terminal(_) => LifecycleOutput::Rejected(ErrorCode::UnknownHandle),
        });
    }

    fn finish(&mut self, code: ErrorCode) {
        self.pending = match self.state {
            StreamState::Open | StreamState::HalfClosed => {
                self.state = StreamState::Terminal(code);
                Some(LifecycleOutput::Finished(code))
            }
            StreamState::Terminal(_) => None,
        };
    }
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

pub enum LifecycleInput {
    Send,
    CloseSend,
    Finish(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutput {
    Admitted,
    Rejected(ErrorCode),
    Finished(ErrorCode),
}

impl StateMachine for LifecycleMachine {
    type Input = LifecycleInput;
    type Output = LifecycleOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            LifecycleInput::Send => self.admit_send(),
            LifecycleInput::CloseSend => self.close_send(),
            LifecycleInput::Finish(code) => self.finish(code),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(machine: &mut LifecycleMachine, input: LifecycleInput) -> Option<LifecycleOutput> {
        machine.process_input(input);
        machine.poll_output()
    }

    #[test]
    fn test_initial_state() {
        let mut machine = LifecycleMachine::new();
        assert_eq!(machine.state(), StreamState::Open);
        assert_eq!(machine.admitted_sends(), 0);
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_send_then_close() {
        let mut machine = LifecycleMachine::new();

        assert_eq!(
            step(&mut machine, LifecycleInput::Send),
            Some(LifecycleOutput::Admitted)
        );
        assert_eq!(
            step(&mut machine, LifecycleInput::Send),
            Some(LifecycleOutput::Admitted)
        );
        assert_eq!(
            step(&mut machine, LifecycleInput::CloseSend),
            Some(LifecycleOutput::Admitted)
        );

        assert_eq!(machine.state(), StreamState::HalfClosed);
        assert_eq!(machine.admitted_sends(), 2);
    }

    #[test]
    fn test_misuse_after_close() {
        let mut machine = LifecycleMachine::new();
        step(&mut machine, LifecycleInput::CloseSend);

        assert_eq!(
            step(&mut machine, LifecycleInput::Send),
            Some(LifecycleOutput::Rejected(ErrorCode::SendAfterClose))
        );
        assert_eq!(
            step(&mut machine, LifecycleInput::CloseSend),
            Some(LifecycleOutput::Rejected(ErrorCode::AlreadyClosed))
        );

        // Rejections leave the state alone
        assert_eq!(machine.state(), StreamState::HalfClosed);
        assert_eq!(machine.admitted_sends(), 0);
    }

    #[test]
    fn test_finish_is_exactly_once() {
        let mut machine = LifecycleMachine::new();

        assert_eq!(
            step(&mut machine, LifecycleInput::Finish(ErrorCode::TransportError)),
            Some(LifecycleOutput::Finished(ErrorCode::TransportError))
        );
        assert!(step(&mut machine, LifecycleInput::Finish(ErrorCode::Ok)).is_none());

        assert_eq!(
            machine.state(),
            StreamState::Terminal(ErrorCode::TransportError)
        );
    }

    #[test]
    fn test_terminal_rejects_as_unknown_handle() {
        let mut machine = LifecycleMachine::new();
        step(&mut machine, LifecycleInput::Finish(ErrorCode::Ok));

        assert_eq!(
            step(&mut machine, LifecycleInput::Send),
            Some(LifecycleOutput::Rejected(ErrorCode::UnknownHandle))
        );
        assert_eq!(
            step(&mut machine, LifecycleInput::CloseSend),
            Some(LifecycleOutput::Rejected(ErrorCode::UnknownHandle))
        );
    }

    #[test]
    fn test_finish_from_half_closed() {
        let mut machine = LifecycleMachine::new();
        step(&mut machine, LifecycleInput::CloseSend);

        assert_eq!(
            step(&mut machine, LifecycleInput::Finish(ErrorCode::Ok)),
            Some(LifecycleOutput::Finished(ErrorCode::Ok))
        );
    }
}
