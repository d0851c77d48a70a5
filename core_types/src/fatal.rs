//! Fatal-abort channel
//!
//! Contract violations (stale references, ownership violations, protocol
//! mismatches) are never returned as errors. They are logged with the name of
//! the offending thread and then the thread panics. The workspace profiles set
//! `panic = "abort"`, so outside the test harness this terminates the process.

use crate::thread::ThreadRef;

/// Logs a fatal contract violation and panics
///
/// Prefer the [`fatal!`](crate::fatal!) and [`fatal_if!`](crate::fatal_if!)
/// macros over calling this directly.
#[cold]
#[track_caller]
pub fn report(message: &str) -> ! {
    let thread = ThreadRef::current();
    let location = std::panic::Location::caller();
    tracing::error!(
        thread = %thread,
        location = %location,
        "FATAL: {}",
        message
    );
    panic!("{}", message);
}

/// Reports a fatal contract violation. Never returns.
///
/// ```should_panic
/// core_types::fatal!("Mutex '{}' unlocked too many times!", "config");
/// ```
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::fatal::report(&::std::format!($($arg)+))
    };
}

/// Reports a fatal contract violation if the condition holds.
#[macro_export]
macro_rules! fatal_if {
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            $crate::fatal!($($arg)+);
        }
    };
}
