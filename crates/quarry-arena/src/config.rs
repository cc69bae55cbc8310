//! Memory system configuration.

use std::error::Error;
use std::fmt;

use quarry_core::{AllocError, ArenaKind, PageRounding};

use crate::page_arena::{ArenaOptions, PageType};

/// Sizing of one facade arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaSpec {
    /// Requested arena size in bytes. The arena adds one page of margin.
    pub size: usize,
    /// Page granularity.
    pub page_type: PageType,
    /// Chunk table capacity. `None` picks the arena default.
    pub max_chunks: Option<usize>,
    /// Rounding of allocation sizes to pages.
    pub rounding: PageRounding,
}

impl ArenaSpec {
    /// A spec with default chunk capacity and rounding.
    pub fn new(size: usize, page_type: PageType) -> Self {
        Self {
            size,
            page_type,
            max_chunks: None,
            rounding: PageRounding::default(),
        }
    }

    /// Construction options for the arena.
    pub fn options(&self) -> ArenaOptions {
        ArenaOptions {
            max_chunks: self.max_chunks,
            rounding: self.rounding,
        }
    }
}

/// Configuration for [`MemorySystem::initialize`](crate::MemorySystem::initialize).
///
/// One [`ArenaSpec`] per arena kind. Validated before any arena is
/// created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Long-lived engine and game data.
    pub main: ArenaSpec,
    /// Subsystem working sets (jobs, queues, renderer state).
    pub transient: ArenaSpec,
    /// Per-frame scratch data.
    pub temp: ArenaSpec,
}

impl MemoryConfig {
    /// Default main arena size: 64 MiB.
    pub const DEFAULT_MAIN_SIZE: usize = 64 * 1024 * 1024;

    /// Default transient arena size: 16 MiB.
    pub const DEFAULT_TRANSIENT_SIZE: usize = 16 * 1024 * 1024;

    /// Default temp arena size: 4 MiB.
    pub const DEFAULT_TEMP_SIZE: usize = 4 * 1024 * 1024;

    /// The spec for one arena kind.
    pub fn spec(&self, kind: ArenaKind) -> &ArenaSpec {
        match kind {
            ArenaKind::Main => &self.main,
            ArenaKind::Transient => &self.transient,
            ArenaKind::Temp => &self.temp,
        }
    }

    /// The same spec for all three arenas. Handy for tests.
    pub fn uniform(size: usize, page_type: PageType) -> Self {
        Self {
            main: ArenaSpec::new(size, page_type),
            transient: ArenaSpec::new(size, page_type),
            temp: ArenaSpec::new(size, page_type),
        }
    }

    /// Check every arena spec.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in ArenaKind::ALL {
            let spec = self.spec(kind);
            if spec.size == 0 {
                return Err(ConfigError::ZeroSize { arena: kind });
            }
            if spec.max_chunks == Some(0) {
                return Err(ConfigError::ZeroChunks { arena: kind });
            }
            let page_size = spec.page_type.page_size();
            if spec.size / page_size >= isize::MAX as usize / page_size {
                return Err(ConfigError::TooLarge {
                    arena: kind,
                    size: spec.size,
                });
            }
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            main: ArenaSpec::new(Self::DEFAULT_MAIN_SIZE, PageType::Large),
            transient: ArenaSpec::new(Self::DEFAULT_TRANSIENT_SIZE, PageType::Medium),
            temp: ArenaSpec::new(Self::DEFAULT_TEMP_SIZE, PageType::Small),
        }
    }
}

/// Errors from validating a [`MemoryConfig`] or bringing the memory
/// system up with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An arena was configured with zero bytes.
    ZeroSize {
        /// The offending arena.
        arena: ArenaKind,
    },
    /// An arena was configured with a zero-capacity chunk table.
    ZeroChunks {
        /// The offending arena.
        arena: ArenaKind,
    },
    /// An arena size cannot be represented as an allocation.
    TooLarge {
        /// The offending arena.
        arena: ArenaKind,
        /// The configured size.
        size: usize,
    },
    /// The arena could not be created.
    Arena {
        /// The arena being created.
        arena: ArenaKind,
        /// The underlying allocator error.
        source: AllocError,
    },
    /// `initialize` was called while the system is already running.
    AlreadyInitialized,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize { arena } => write!(f, "{arena} arena size must be non-zero"),
            Self::ZeroChunks { arena } => {
                write!(f, "{arena} arena chunk capacity must be non-zero")
            }
            Self::TooLarge { arena, size } => {
                write!(f, "{arena} arena size {size} is too large")
            }
            Self::Arena { arena, source } => write!(f, "{arena} arena: {source}"),
            Self::AlreadyInitialized => write!(f, "memory system is already initialized"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Arena { source, .. } => Some(source),
            _ => None,
        }
    }
}
