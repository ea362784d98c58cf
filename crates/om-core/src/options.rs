//! Engine and loader configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default tick interval of the wall-clock ticker
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Default maximum value-stack size (in slots)
pub const DEFAULT_MAX_STACK: usize = 1024 * 64;

/// Default maximum call depth per thread
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

/// Default maximum number of elements in one array
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1 << 24;

/// Default maximum number of live threads
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// What drives scheduling points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    /// A background ticker fires every interval
    Wall(Duration),
    /// One tick every `n` executed instructions
    Steps(u64),
}

impl Default for TickSource {
    fn default() -> Self {
        TickSource::Wall(DEFAULT_TICK)
    }
}

/// Options for running a program
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Tick source
    pub tick: TickSource,

    /// Value-stack slot limit per thread
    pub max_stack: usize,

    /// Call depth limit per thread
    pub max_call_depth: usize,

    /// Live thread limit
    pub max_threads: usize,

    /// Element limit for `newarray`
    pub max_array_len: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            tick: TickSource::default(),
            max_stack: DEFAULT_MAX_STACK,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_threads: DEFAULT_MAX_THREADS,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl VmOptions {
    /// Set the tick source
    pub fn with_tick(mut self, tick: TickSource) -> Self {
        self.tick = tick;
        self
    }

    /// Set the value-stack limit
    pub fn with_max_stack(mut self, slots: usize) -> Self {
        self.max_stack = slots;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the thread limit
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set the `newarray` element limit
    pub fn with_max_array_len(mut self, elements: usize) -> Self {
        self.max_array_len = elements;
        self
    }
}

/// Options for loading and linking
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Run the branch-size optimizer over the merged code segment
    pub optimize_branches: bool,

    /// Verify every unit before linking
    pub verify: bool,

    /// Directories searched for `<module>.om`
    pub search_paths: Vec<PathBuf>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            optimize_branches: true,
            verify: true,
            search_paths: Vec::new(),
        }
    }
}

impl LoaderOptions {
    /// Enable or disable branch optimization
    pub fn with_optimize(mut self, enabled: bool) -> Self {
        self.optimize_branches = enabled;
        self
    }

    /// Enable or disable verification
    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Set the module search directories
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Append a search directory
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }
}
