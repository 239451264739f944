//! Fatal error reporting.
//!
//! The heap is process-wide state; once an invariant is broken there is no
//! way to continue without corrupting user data, so every error here prints
//! a diagnostic to stderr and aborts the process.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FatalKind {
    /// No memory available after collection escalation.
    AllocationExhausted,
    /// An internal consistency check failed.
    InvariantViolated,
    /// The mutator called the heap in a way the API forbids.
    MisuseAtMutator,
    /// A user copy/scan/finalise function reported an unsupported argument.
    UserShapeBug,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalKind::AllocationExhausted => "allocation exhausted",
            FatalKind::InvariantViolated => "invariant violated",
            FatalKind::MisuseAtMutator => "misuse at mutator",
            FatalKind::UserShapeBug => "user shape bug",
        };
        f.write_str(name)
    }
}

#[cold]
pub fn die(kind: FatalKind, location: &str, message: fmt::Arguments<'_>) -> ! {
    eprintln!("[gc] fatal ({}): {} at {}", kind, message, location);
    eprintln!("{:?}", backtrace::Backtrace::new());
    std::process::abort();
}

/// Report a fatal condition and abort. Never returns.
#[macro_export]
macro_rules! fatal {
    ($kind: expr, $($arg: tt)*) => {
        $crate::error::die(
            $kind,
            concat!(file!(), ":", line!()),
            format_args!($($arg)*),
        )
    };
}
