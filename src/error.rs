use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure taxonomy of the pipeline:
///
/// ## Fatal structure errors
/// - [`Error::Malformed`] - Unparseable bytecode, bad descriptors, dangling labels
/// - [`Error::IrError`] - An IR body violates one of its structural invariants
///
/// ## Recoverable per-method errors
/// - [`Error::InvalidDebugInfo`] - The local variable table is inconsistent. The IR builder
///   catches this, drops the locals and retries once; it only escapes when the second attempt
///   fails for a different reason.
///
/// ## Aggregated diagnostics
/// - [`Error::MissingDefinitions`] - One report listing every missing class, field and method
/// - [`Error::CheckDiscardFailed`] - Definitions that were required to be removed stayed live
///
/// ## Pipeline errors
/// - [`Error::PassFailed`] - A per-method pass failed; the remaining work of that pass is
///   cancelled
/// - [`Error::Resolution`] - A reference could not be resolved where resolution is mandatory
/// - [`Error::LensError`] - A lens layer was built with conflicting mappings
/// - [`Error::GraphError`] - Graph construction or analysis error
///
/// # Examples
///
/// ```rust,no_run
/// use cfshrink::{Error, Shrinker, ShrinkerOptions};
/// # fn run(shrinker: Shrinker) {
/// match shrinker.run() {
///     Ok(result) => println!("{} classes survived", result.classes.len()),
///     Err(Error::MissingDefinitions { count, report }) => {
///         eprintln!("{count} missing definitions:\n{report}");
///     }
///     Err(e) => eprintln!("shrinking failed: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be processed.
    ///
    /// The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The local variable table of a method is inconsistent with its code.
    #[error("Invalid debug info: {0}")]
    InvalidDebugInfo(String),

    /// One or more references resolved to no definition.
    ///
    /// Reported once per run with every missing class, field and method.
    #[error("Compilation can't be completed because {count} definition(s) are missing:\n{report}")]
    MissingDefinitions {
        /// Number of missing definitions
        count: usize,
        /// Human readable listing of the missing definitions and their contexts
        report: String,
    },

    /// Definitions marked as "check discard" are still reachable after shrinking.
    #[error("Discard checks failed:\n{0}")]
    CheckDiscardFailed(String),

    /// A mandatory resolution failed.
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// A lens layer could not be constructed.
    #[error("Lens error: {0}")]
    LensError(String),

    /// An IR body violates its invariants.
    #[error("IR error: {0}")]
    IrError(String),

    /// A per-method pass failed.
    ///
    /// The first failure of a pass cancels its remaining scheduled work.
    #[error("Pass '{pass}' failed on {method}: {source}")]
    PassFailed {
        /// Name of the failing pass
        pass: &'static str,
        /// The method being processed
        method: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Failed to lock a shared resource.
    #[error("Failed to lock target")]
    LockError,

    /// Graph construction or analysis error.
    #[error("{0}")]
    GraphError(String),
}
