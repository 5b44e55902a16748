//! Cooperative cancellation between node applications.
//!
//! The engine checks the flag before starting each node. A node already in
//! flight always runs to completion so no remote resource is left half-applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

static SIGINT_TARGET: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(flag) = SIGINT_TARGET.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Route SIGINT to `flag`. Only the first registered flag receives signals.
/// Returns false when the handler could not be installed.
#[cfg(unix)]
pub fn install_interrupt_handler(flag: &CancelFlag) -> bool {
    let _ = SIGINT_TARGET.set(flag.flag.clone());
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe { libc::signal(libc::SIGINT, handler) != libc::SIG_ERR }
}

#[cfg(not(unix))]
pub fn install_interrupt_handler(flag: &CancelFlag) -> bool {
    let _ = SIGINT_TARGET.set(flag.flag.clone());
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancelFlag::new().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelFlag::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn handler_installs() {
        let flag = CancelFlag::new();
        assert!(install_interrupt_handler(&flag));
    }
}
