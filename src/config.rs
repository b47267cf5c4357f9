//! Configuration for the shrinking and optimization pipeline.
//!
//! [`ShrinkerOptions`] collects every knob the pipeline consults: iteration limits, which
//! optimizations run, how missing definitions are reported and how debug information and
//! stack map frames are treated on re-emission.

use std::fmt;

/// A class-file version as stored in the class header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassFileVersion {
    /// Major version (45 = 1.1, 49 = 5, 50 = 6, 51 = 7, 52 = 8, ...).
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl ClassFileVersion {
    /// Java 5 class files, the last version without stack map frames.
    pub const V1_5: Self = Self::new(49, 0);
    /// Java 6 class files, where stack map frames are optional.
    pub const V1_6: Self = Self::new(50, 0);
    /// Java 7 class files, where stack map frames are mandatory.
    pub const V1_7: Self = Self::new(51, 0);
    /// Java 8 class files.
    pub const V1_8: Self = Self::new(52, 0);

    /// Creates a new version.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Returns `true` if code written for this version carries stack map frames.
    ///
    /// Versions up to 49 never carry frames. Version 50 carries them only when the input
    /// table is retained (`keep_v50_frames`), and every later version requires them.
    #[must_use]
    pub fn requires_stack_map_frames(self, keep_v50_frames: bool) -> bool {
        if self <= Self::V1_5 {
            return false;
        }
        if self.major == Self::V1_6.major {
            return keep_v50_frames;
        }
        true
    }
}

impl Default for ClassFileVersion {
    fn default() -> Self {
        Self::V1_8
    }
}

impl fmt::Display for ClassFileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Options controlling the shrinker.
#[derive(Debug, Clone)]
pub struct ShrinkerOptions {
    /// Maximum number of optimization rounds over the whole program.
    pub max_iterations: usize,

    /// Maximum iterations for a single pass group before moving on.
    pub max_phase_iterations: usize,

    /// Maximum estimated instruction count of an inlining candidate.
    pub inline_threshold: usize,

    /// Enables the inliner.
    pub enable_inlining: bool,

    /// Enables argument propagation.
    pub enable_argument_propagation: bool,

    /// Enables horizontal class merging.
    pub enable_class_merging: bool,

    /// Enables field access analysis and the removal of stores to fields nobody reads.
    pub enable_field_optimization: bool,

    /// Keeps local variable tables on re-emission.
    pub keep_debug_info: bool,

    /// Keeps stack map frames for version 50 class files.
    pub keep_stack_map_for_v50: bool,

    /// Turns the missing-definitions error into a warning.
    pub ignore_warnings: bool,

    /// Patterns suppressing missing-definition reports (`com.example.**`, `com.example.*`,
    /// exact class names).
    pub dont_warn: Vec<String>,

    /// Processes independent methods on the rayon pool.
    pub parallel: bool,
}

impl Default for ShrinkerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_phase_iterations: 8,
            inline_threshold: 20,
            enable_inlining: true,
            enable_argument_propagation: true,
            enable_class_merging: true,
            enable_field_optimization: true,
            keep_debug_info: true,
            keep_stack_map_for_v50: false,
            ignore_warnings: false,
            dont_warn: Vec::new(),
            parallel: true,
        }
    }
}

impl ShrinkerOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with every optimization disabled; only tree shaking remains.
    #[must_use]
    pub fn shrink_only() -> Self {
        Self {
            enable_inlining: false,
            enable_argument_propagation: false,
            enable_class_merging: false,
            enable_field_optimization: false,
            ..Self::default()
        }
    }

    /// Sets the inlining threshold.
    #[must_use]
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Enables or disables inlining.
    #[must_use]
    pub fn with_inlining(mut self, enabled: bool) -> Self {
        self.enable_inlining = enabled;
        self
    }

    /// Enables or disables argument propagation.
    #[must_use]
    pub fn with_argument_propagation(mut self, enabled: bool) -> Self {
        self.enable_argument_propagation = enabled;
        self
    }

    /// Enables or disables class merging.
    #[must_use]
    pub fn with_class_merging(mut self, enabled: bool) -> Self {
        self.enable_class_merging = enabled;
        self
    }

    /// Enables or disables field access analysis and dead field store removal.
    #[must_use]
    pub fn with_field_optimization(mut self, enabled: bool) -> Self {
        self.enable_field_optimization = enabled;
        self
    }

    /// Keeps or drops local variable tables.
    #[must_use]
    pub fn with_debug_info(mut self, keep: bool) -> Self {
        self.keep_debug_info = keep;
        self
    }

    /// Downgrades missing definitions to a warning.
    #[must_use]
    pub fn with_ignore_warnings(mut self, ignore: bool) -> Self {
        self.ignore_warnings = ignore;
        self
    }

    /// Adds a missing-definition suppression pattern.
    #[must_use]
    pub fn with_dont_warn(mut self, pattern: impl Into<String>) -> Self {
        self.dont_warn.push(pattern.into());
        self
    }

    /// Runs everything on the calling thread.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Returns `true` if any optimization pass is enabled.
    #[must_use]
    pub fn any_optimization_enabled(&self) -> bool {
        self.enable_inlining
            || self.enable_argument_propagation
            || self.enable_class_merging
            || self.enable_field_optimization
    }
}
