pub mod lifecycle;

/// The [`StateMachine`] trait gives a pure state machine uniform calling semantics: feed it an
/// [`Input`](StateMachine::Input), then poll it for the resulting
/// [`Output`](StateMachine::Output).
///
/// # Functionality
/// Inputs and outputs are usually enums with one variant per kind of event. The implementor maps
/// each input variant onto an inherent method in [`process_input`](StateMachine::process_input)
/// and collects pending results in [`poll_output`](StateMachine::poll_output), so the inherent
/// impl can stay focused on transitions.
///
/// # Invariants
/// Implementors must be deterministic: the same sequence of inputs always produces the same
/// sequence of outputs.
///
/// ## No Interior Mutability
/// State changes only through `&mut self`. No cells, locks, atomics or reference counted
/// pointers inside the machine. Synchronization belongs to whatever container owns the machine
/// (see [`CallEntry`](crate::registry::CallEntry), which keeps one behind a mutex).
///
/// ## No IO, Time or Randomness
/// The machine never reads clocks, entropy or the network. Anything of the kind is fed in as
/// input by the owner.
///
/// ## No Async, No Blocking
/// Processing an input is a bounded, synchronous computation. This is what makes it safe to
/// drive a machine while holding a short-lived lock from both caller threads and runtime tasks.
///
/// # Side Effects
/// Logging is allowed as long as the machine's logic never depends on it.
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) by the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
