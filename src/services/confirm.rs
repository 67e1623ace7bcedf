//! Blocking confirmation prompt required before irreversible deletes.

/// Asks the user to confirm a destructive action.
///
/// Implemented for `bool` (an answer collected up front, e.g. a
/// `?confirm=true` query flag) and for closures that prompt on demand.
pub trait Confirm: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

impl Confirm for bool {
    fn confirm(&self, _message: &str) -> bool {
        *self
    }
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}
