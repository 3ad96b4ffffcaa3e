//! Cooperative cancellation for long-running engine operations.
//!
//! The engine has no async runtime to hang a `Future` off of, so cancellation
//! is a token checked at suspension points (segment I/O, merge output
//! rotation) rather than a polled state machine. A cloned token can be held
//! by a caller and flipped from another thread while a `get`, flush, or
//! merge is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::Error;

/// A cheaply-cloned flag checked at the suspension points named in the
/// engine's concurrency contract.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
