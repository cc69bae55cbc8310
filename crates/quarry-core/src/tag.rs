//! Memory tags and arena kinds.
//!
//! Every allocation carries a [`MemoryTag`] naming the engine subsystem
//! that requested it. Tags are used for accounting and for choosing which
//! long-lived arena serves the request; they never change allocation
//! semantics.

use std::fmt;

/// The long-lived arenas owned by the memory facade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArenaKind {
    /// Engine-lifetime data: resources, scene graph, subsystem state.
    Main,
    /// Data that outlives a frame but not a level: job payloads, queues.
    Transient,
    /// Short-lived scratch data, typically recycled every frame.
    Temp,
}

impl ArenaKind {
    /// All arena kinds in dispatch order.
    pub const ALL: [ArenaKind; 3] = [ArenaKind::Main, ArenaKind::Transient, ArenaKind::Temp];

    /// Lower-case name used in logs and usage reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Transient => "transient",
            Self::Temp => "temp",
        }
    }
}

impl fmt::Display for ArenaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Closed set of allocation tags, one per engine subsystem.
///
/// The discriminant is stored in a single byte inside dynamic allocator
/// headers, so the enum is `#[repr(u8)]` and its values are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MemoryTag {
    /// Untagged allocation. Should be replaced with a real tag.
    Unknown = 0,
    /// Fixed-size arrays.
    Array,
    /// Growable arrays.
    DynArray,
    /// Hash tables.
    HashTable,
    /// Strings and string builders.
    String,
    /// Ring buffers and queues.
    RingQueue,
    /// Binary search trees.
    Bst,
    /// Backing storage of linear allocators.
    LinearAllocator,
    /// Application-level data.
    Application,
    /// Engine bookkeeping.
    Engine,
    /// Job system payloads.
    Job,
    /// Texture pixel data.
    Texture,
    /// Material instances.
    MaterialInstance,
    /// Renderer frontend data.
    Renderer,
    /// Game logic.
    Game,
    /// Transforms.
    Transform,
    /// Entities.
    Entity,
    /// Scene graph.
    Scene,
    /// Loaded resources.
    Resource,
    /// Graphics driver allocations tracked externally.
    Vulkan,
    /// GPU-local memory tracked externally.
    GpuLocal,
    /// Bitmap fonts.
    BitmapFont,
    /// System fonts.
    SystemFont,
    /// Input key maps.
    KeyMap,
    /// User interface.
    Ui,
    /// Audio buffers.
    Audio,
    /// Per-frame data.
    Frame,
    /// Throwaway scratch buffers.
    Scratch,
}

impl MemoryTag {
    /// Number of tags.
    pub const COUNT: usize = 28;

    /// All tags in discriminant order.
    pub const ALL: [MemoryTag; Self::COUNT] = [
        MemoryTag::Unknown,
        MemoryTag::Array,
        MemoryTag::DynArray,
        MemoryTag::HashTable,
        MemoryTag::String,
        MemoryTag::RingQueue,
        MemoryTag::Bst,
        MemoryTag::LinearAllocator,
        MemoryTag::Application,
        MemoryTag::Engine,
        MemoryTag::Job,
        MemoryTag::Texture,
        MemoryTag::MaterialInstance,
        MemoryTag::Renderer,
        MemoryTag::Game,
        MemoryTag::Transform,
        MemoryTag::Entity,
        MemoryTag::Scene,
        MemoryTag::Resource,
        MemoryTag::Vulkan,
        MemoryTag::GpuLocal,
        MemoryTag::BitmapFont,
        MemoryTag::SystemFont,
        MemoryTag::KeyMap,
        MemoryTag::Ui,
        MemoryTag::Audio,
        MemoryTag::Frame,
        MemoryTag::Scratch,
    ];

    /// Index of the tag into per-tag tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Decode a tag from its stored byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Fixed-width display name used in usage reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Array => "ARRAY",
            Self::DynArray => "DARRAY",
            Self::HashTable => "HASHTABLE",
            Self::String => "STRING",
            Self::RingQueue => "RING_QUEUE",
            Self::Bst => "BST",
            Self::LinearAllocator => "LINEAR_ALLOC",
            Self::Application => "APPLICATION",
            Self::Engine => "ENGINE",
            Self::Job => "JOB",
            Self::Texture => "TEXTURE",
            Self::MaterialInstance => "MAT_INST",
            Self::Renderer => "RENDERER",
            Self::Game => "GAME",
            Self::Transform => "TRANSFORM",
            Self::Entity => "ENTITY",
            Self::Scene => "SCENE",
            Self::Resource => "RESOURCE",
            Self::Vulkan => "VULKAN",
            Self::GpuLocal => "GPU_LOCAL",
            Self::BitmapFont => "BITMAP_FONT",
            Self::SystemFont => "SYSTEM_FONT",
            Self::KeyMap => "KEYMAP",
            Self::Ui => "UI",
            Self::Audio => "AUDIO",
            Self::Frame => "FRAME",
            Self::Scratch => "SCRATCH",
        }
    }

    /// The facade arena that serves allocations with this tag.
    pub fn arena(self) -> ArenaKind {
        match self {
            Self::Frame | Self::Scratch | Self::String => ArenaKind::Temp,
            Self::Job | Self::RingQueue | Self::LinearAllocator | Self::Renderer => {
                ArenaKind::Transient
            }
            _ => ArenaKind::Main,
        }
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<MemoryTag> for u8 {
    fn from(tag: MemoryTag) -> Self {
        tag as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_discriminant_order() {
        for (i, tag) in MemoryTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i, "{tag} out of order");
        }
        assert_eq!(MemoryTag::Scratch.index(), MemoryTag::COUNT - 1);
    }

    #[test]
    fn from_u8_rejects_out_of_range() {
        assert_eq!(MemoryTag::from_u8(0), Some(MemoryTag::Unknown));
        assert_eq!(MemoryTag::from_u8(MemoryTag::COUNT as u8), None);
        assert_eq!(MemoryTag::from_u8(u8::MAX), None);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = MemoryTag::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MemoryTag::COUNT);
    }

    #[test]
    fn arena_dispatch() {
        assert_eq!(MemoryTag::Texture.arena(), ArenaKind::Main);
        assert_eq!(MemoryTag::Job.arena(), ArenaKind::Transient);
        assert_eq!(MemoryTag::Frame.arena(), ArenaKind::Temp);
        assert_eq!(MemoryTag::Unknown.arena(), ArenaKind::Main);
    }
}
