/// Indicates that an operation referenced a handle that was never issued or whose call has
/// already completed.
#[derive(Debug, thiserror::Error)]
#[error("the provided call handle ({handle}) is not live")]
pub struct UnknownHandle {
    pub handle: u64,
}
