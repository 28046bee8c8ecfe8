//! Small helpers shared across modules

pub mod logging;

use std::panic::{AssertUnwindSafe, catch_unwind};

use log::error;

/// Run a user-supplied callback, logging and swallowing a panic
///
/// Returns `false` when the callback panicked.
pub(crate) fn call_guarded<F: FnOnce()>(context: &str, callback: F) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{} callback panicked: {}", context, message);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_guarded_swallows_panic() {
        assert!(call_guarded("noop", || {}));
        assert!(!call_guarded("boom", || panic!("restart hook failed")));
    }
}
