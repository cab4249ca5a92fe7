//! Request-scoped cancellation.
//!
//! Every runner takes a `RequestContext`. Cancelling it is observed at the
//! next suspension point: between steps, while waiting on a subprocess, or
//! while reading a streamed command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// How often blocking waits wake up to look at the cancellation flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones of this context observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with a cancellation error if the request was cancelled.
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::request_cancelled(during));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        assert!(clone.check("step").is_ok());

        ctx.cancel();
        let err = clone.check("step").unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.message, "request cancelled during step");
    }
}
