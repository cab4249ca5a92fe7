//! Ctrl-C handling for long runs.
//!
//! The first SIGINT cancels the request so running projects can refuse
//! pending confirmations and post their final status. A second SIGINT
//! terminates the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tfgate::context::{RequestContext, POLL_INTERVAL};
use tfgate::log_status;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

/// Cancel `ctx` on the first SIGINT.
pub fn cancel_on_interrupt(ctx: &RequestContext) {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t);
    }
    watch(ctx.clone(), &INTERRUPTED);
}

fn watch(ctx: RequestContext, flag: &'static AtomicBool) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !flag.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
        log_status!("run", "Interrupted, cancelling (press Ctrl-C again to abort)");
        tracing::warn!("interrupt received, cancelling request");
        ctx.cancel();
    })
}
