use deriva_core::Observer;

use crate::{Error, Event};

/// Control actions supported by the gradient computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Abandon the computation and return [`Error::Aborted`].
    Abort,
}

/// Sends `event` to the observer and turns an abort into an error.
pub(crate) fn emit<O>(observer: &mut O, event: Event) -> Result<(), Error>
where
    O: Observer<Event, Action>,
{
    match observer.observe(&event) {
        Some(Action::Abort) => Err(Error::Aborted),
        None => Ok(()),
    }
}
