//! The memory facade.
//!
//! [`MemorySystem`] is the single entry point engine code allocates
//! through. It owns one [`PageArena`] per [`ArenaKind`] and routes each
//! request by its [`MemoryTag`]. Before [`initialize`](MemorySystem::initialize)
//! and after [`shutdown`](MemorySystem::shutdown) it serves requests from
//! the platform allocator instead, so code that runs during start-up or
//! tear-down does not need a special path.
//!
//! Every live allocation is recorded in a side table keyed by address.
//! The table supplies the tag and size for accounting on `free`, and tells
//! the facade which allocator a pointer came from.
//!
//! # Failure policy
//!
//! Zero-size requests and unsupported alignments yield `None`. Running
//! out of arena space, or freeing a pointer the facade never handed out,
//! is a programming error and panics after logging the details.

use std::ptr::NonNull;

use indexmap::IndexMap;
use quarry_core::{AllocError, ArenaKind, MemoryTag, TaggedAllocator};

use crate::config::{ConfigError, MemoryConfig};
use crate::page_arena::PageArena;
use crate::raw::PlatformHeap;
use crate::stats::MemoryStats;

/// Where a facade allocation lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Arena(ArenaKind),
    /// Bootstrap or shut-down fallback.
    Platform,
}

/// Bookkeeping for one live facade allocation.
#[derive(Clone, Copy, Debug)]
struct AllocationRecord {
    tag: MemoryTag,
    /// Requested, not page-rounded, size.
    size: usize,
    alignment: usize,
    origin: Origin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SystemState {
    Bootstrap,
    Running,
    ShutDown,
}

struct Arenas {
    main: PageArena,
    transient: PageArena,
    temp: PageArena,
}

impl Arenas {
    fn create(config: &MemoryConfig) -> Result<Self, ConfigError> {
        let make = |kind: ArenaKind| {
            let spec = config.spec(kind);
            PageArena::with_options(spec.size, spec.page_type, spec.options())
                .map_err(|source| ConfigError::Arena { arena: kind, source })
        };
        Ok(Self {
            main: make(ArenaKind::Main)?,
            transient: make(ArenaKind::Transient)?,
            temp: make(ArenaKind::Temp)?,
        })
    }

    fn get_mut(&mut self, kind: ArenaKind) -> &mut PageArena {
        match kind {
            ArenaKind::Main => &mut self.main,
            ArenaKind::Transient => &mut self.transient,
            ArenaKind::Temp => &mut self.temp,
        }
    }
}

/// The engine's tagged memory facade.
///
/// # Example
///
/// ```
/// use quarry_arena::{MemoryConfig, MemorySystem, PageType};
/// use quarry_core::MemoryTag;
///
/// let mut memory = MemorySystem::new();
/// memory
///     .initialize(MemoryConfig::uniform(64 * 1024, PageType::Small))
///     .unwrap();
/// let ptr = memory.allocate(256, MemoryTag::Texture).unwrap();
/// assert_eq!(memory.stats().tag_bytes(MemoryTag::Texture), 256);
/// memory.free(ptr);
/// memory.shutdown();
/// ```
pub struct MemorySystem {
    arenas: Option<Arenas>,
    state: SystemState,
    platform: PlatformHeap,
    records: IndexMap<usize, AllocationRecord>,
    stats: MemoryStats,
}

impl MemorySystem {
    /// A facade in the bootstrap state.
    pub fn new() -> Self {
        Self {
            arenas: None,
            state: SystemState::Bootstrap,
            platform: PlatformHeap::new(),
            records: IndexMap::new(),
            stats: MemoryStats::default(),
        }
    }

    /// Create the three arenas and start serving requests from them.
    ///
    /// Allocations made before this call stay on the platform allocator
    /// and can still be freed through the facade.
    pub fn initialize(&mut self, config: MemoryConfig) -> Result<(), ConfigError> {
        if self.state == SystemState::Running {
            return Err(ConfigError::AlreadyInitialized);
        }
        config.validate()?;
        let arenas = Arenas::create(&config)?;
        tracing::info!(
            main = arenas.main.capacity(),
            transient = arenas.transient.capacity(),
            temp = arenas.temp.capacity(),
            "memory system initialized"
        );
        self.arenas = Some(arenas);
        self.state = SystemState::Running;
        Ok(())
    }

    /// Release the arenas and fall back to the platform allocator.
    ///
    /// Arena allocations still live at this point are reported as leaks
    /// and dropped from the books; their memory goes away with the arenas.
    pub fn shutdown(&mut self) {
        let Some(arenas) = self.arenas.take() else {
            tracing::debug!(state = ?self.state, "memory system shutdown without arenas");
            self.state = SystemState::ShutDown;
            return;
        };
        let leaked: Vec<(usize, AllocationRecord)> = self
            .records
            .iter()
            .filter(|(_, r)| matches!(r.origin, Origin::Arena(_)))
            .map(|(&addr, &r)| (addr, r))
            .collect();
        for (addr, record) in &leaked {
            tracing::warn!(
                addr = format_args!("{addr:#x}"),
                tag = %record.tag,
                size = record.size,
                arena = ?record.origin,
                "leaked allocation at shutdown"
            );
            self.records.swap_remove(addr);
            self.stats.record_free(record.tag, record.size);
        }
        drop(arenas);
        tracing::info!(
            leaked = leaked.len(),
            platform_live = self.platform.live_count(),
            "memory system shut down"
        );
        self.state = SystemState::ShutDown;
    }

    /// Whether the arenas are live.
    pub fn is_initialized(&self) -> bool {
        self.state == SystemState::Running
    }

    /// Allocate `size` bytes for `tag`.
    pub fn allocate(&mut self, size: usize, tag: MemoryTag) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, 1, tag)
    }

    /// Allocate `size` bytes for `tag`, aligned to `alignment`.
    ///
    /// Memory is zeroed. Returns `None` for a zero size or an alignment
    /// the serving allocator cannot honour.
    ///
    /// # Panics
    ///
    /// Panics if the tag's arena is exhausted.
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
        tag: MemoryTag,
    ) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let (ptr, origin) = match self.arenas.as_mut() {
            Some(arenas) => {
                let kind = tag.arena();
                let result = arenas.get_mut(kind).allocate_aligned(size, alignment);
                (escalate("allocate", tag, size, result)?, Origin::Arena(kind))
            }
            None => {
                if !alignment.is_power_of_two() {
                    tracing::warn!(alignment, "platform fallback needs a power-of-two alignment");
                    return None;
                }
                (self.platform.allocate(size, alignment)?, Origin::Platform)
            }
        };
        self.records.insert(
            ptr.as_ptr() as usize,
            AllocationRecord {
                tag,
                size,
                alignment,
                origin,
            },
        );
        self.stats.record_allocation(tag, size);
        Some(ptr)
    }

    /// Resize an allocation, keeping its tag.
    pub fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let alignment = self
            .records
            .get(&(ptr.as_ptr() as usize))
            .map_or(1, |r| r.alignment);
        self.reallocate_aligned(ptr, new_size, alignment)
    }

    /// Resize an allocation to `new_size` bytes aligned to `alignment`.
    ///
    /// Contents are preserved up to the smaller of the two sizes. Returns
    /// `None` and leaves the allocation untouched for a zero size, an
    /// unsupported alignment, or an unknown pointer after shutdown.
    ///
    /// # Panics
    ///
    /// Panics if the arena is exhausted, or if `ptr` is unknown while the
    /// system is running.
    pub fn reallocate_aligned(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let addr = ptr.as_ptr() as usize;
        let Some(&record) = self.records.get(&addr) else {
            self.unknown_pointer("reallocate", ptr);
            return None;
        };
        if new_size == 0 {
            return None;
        }
        let moved = match record.origin {
            Origin::Arena(kind) => {
                let arena = self
                    .arenas
                    .as_mut()
                    .expect("arena records are dropped at shutdown")
                    .get_mut(kind);
                let result = arena.reallocate_aligned(new_size, ptr, alignment);
                escalate("reallocate", record.tag, new_size, result)?
            }
            Origin::Platform => {
                if !alignment.is_power_of_two() {
                    return None;
                }
                self.platform.reallocate(ptr, new_size, alignment)?
            }
        };
        self.records.swap_remove(&addr);
        self.records.insert(
            moved.as_ptr() as usize,
            AllocationRecord {
                size: new_size,
                alignment,
                ..record
            },
        );
        self.stats.record_resize(record.tag, record.size, new_size);
        Some(moved)
    }

    /// Release an allocation made through the facade.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is unknown while the system is running. After
    /// shutdown, unknown pointers are logged and ignored.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let Some(record) = self.records.swap_remove(&(ptr.as_ptr() as usize)) else {
            self.unknown_pointer("free", ptr);
            return;
        };
        match record.origin {
            Origin::Arena(kind) => {
                let arena = self
                    .arenas
                    .as_mut()
                    .expect("arena records are dropped at shutdown")
                    .get_mut(kind);
                if let Err(e) = arena.free(ptr) {
                    tracing::error!(%e, tag = %record.tag, arena = %kind, "arena rejected free");
                    panic!("memory system: {kind} arena rejected free of {ptr:p}: {e}");
                }
            }
            Origin::Platform => {
                self.platform
                    .free(ptr)
                    .expect("platform records mirror live platform blocks");
            }
        }
        self.stats.record_free(record.tag, record.size);
    }

    /// Account for memory allocated outside the facade, such as GPU
    /// memory owned by a driver.
    pub fn track_external_allocation(&mut self, size: usize, tag: MemoryTag) {
        self.stats.record_external_allocation(tag, size);
    }

    /// Undo [`track_external_allocation`](Self::track_external_allocation).
    pub fn track_external_free(&mut self, size: usize, tag: MemoryTag) {
        if !self.stats.record_external_free(tag, size) {
            tracing::warn!(%tag, size, "external free exceeds tracked external memory");
        }
    }

    /// Live accounting.
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Human-readable per-tag usage table.
    pub fn usage_report(&self) -> String {
        self.stats.usage_report()
    }

    /// Number of live facade allocations.
    pub fn allocation_count(&self) -> usize {
        self.records.len()
    }

    fn unknown_pointer(&self, op: &str, ptr: NonNull<u8>) {
        if self.state == SystemState::Running {
            tracing::error!(op, ptr = ?ptr, "pointer not allocated by the memory system");
            panic!("memory system: {op} of unknown pointer {ptr:p}");
        }
        tracing::warn!(op, ptr = ?ptr, state = ?self.state, "ignoring unknown pointer");
    }
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the facade failure policy to an arena result.
fn escalate(
    op: &str,
    tag: MemoryTag,
    size: usize,
    result: Result<NonNull<u8>, AllocError>,
) -> Option<NonNull<u8>> {
    match result {
        Ok(ptr) => Some(ptr),
        Err(AllocError::ZeroSize) => None,
        Err(e @ AllocError::InvalidAlignment { .. }) => {
            tracing::warn!(op, %tag, size, %e, "alignment not supported");
            None
        }
        Err(e) => {
            tracing::error!(op, %tag, size, arena = %tag.arena(), %e, "fatal allocation failure");
            panic!("memory system: {op} of {size} bytes for {tag} failed: {e}");
        }
    }
}

impl TaggedAllocator for MemorySystem {
    fn allocate(&mut self, size: usize, alignment: usize, tag: MemoryTag) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, alignment, tag)
    }

    fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        self.reallocate_aligned(ptr, new_size, alignment)
    }

    fn free(&mut self, ptr: NonNull<u8>) {
        MemorySystem::free(self, ptr);
    }
}
