//! Chunk statuses and the [`ChunkAccess`] enum shared by proto and full chunks.

use std::fmt;

use chunkgen_utils::ChunkPos;

use crate::chunk::chunk_storage::SavedChunk;
use crate::chunk::level_chunk::LevelChunk;
use crate::chunk::proto_chunk::ProtoChunk;

/// The generation stages a chunk goes through, in order.
///
/// The ordering is total: every status except [`ChunkStatus::Empty`] has exactly one parent,
/// the status directly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChunkStatus {
    /// Nothing but an allocated chunk.
    Empty,
    /// Structure start positions have been picked.
    StructureStarts,
    /// References to structures in neighbouring chunks are collected.
    StructureReferences,
    /// Biomes are sampled.
    Biomes,
    /// Base terrain shape from noise.
    Noise,
    /// Surface rules are applied.
    Surface,
    /// Caves and canyons are carved.
    Carvers,
    /// Decorations and features are placed.
    Features,
    /// Light sources are collected.
    InitializeLight,
    /// Light is propagated.
    Light,
    /// Initial mobs are spawned.
    Spawn,
    /// The chunk is a complete level chunk.
    Full,
}

impl ChunkStatus {
    /// Number of statuses.
    pub const COUNT: usize = 12;

    /// All statuses in generation order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Empty,
        Self::StructureStarts,
        Self::StructureReferences,
        Self::Biomes,
        Self::Noise,
        Self::Surface,
        Self::Carvers,
        Self::Features,
        Self::InitializeLight,
        Self::Light,
        Self::Spawn,
        Self::Full,
    ];

    /// Position of this status in [`ChunkStatus::ALL`].
    #[must_use]
    pub const fn get_index(self) -> usize {
        self as usize
    }

    /// Looks a status up by its index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// The status directly before this one, `None` for [`ChunkStatus::Empty`].
    #[must_use]
    pub const fn get_parent(self) -> Option<Self> {
        match self {
            Self::Empty => None,
            _ => Some(Self::ALL[self as usize - 1]),
        }
    }

    /// The status directly after this one, `None` for [`ChunkStatus::Full`].
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Self::from_index(self as usize + 1)
    }

    /// Returns true if `self` is `other` or comes later.
    #[must_use]
    pub const fn is_or_after(self, other: Self) -> bool {
        self as u8 >= other as u8
    }

    /// Returns true if `self` comes strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        (self as u8) < other as u8
    }

    /// Returns true if `self` comes strictly after `other`.
    #[must_use]
    pub const fn is_after(self, other: Self) -> bool {
        self as u8 > other as u8
    }

    /// The later of two statuses.
    #[must_use]
    pub const fn max(a: Self, b: Self) -> Self {
        if a.is_or_after(b) { a } else { b }
    }

    /// The namespaced identifier of this status.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "minecraft:empty",
            Self::StructureStarts => "minecraft:structure_starts",
            Self::StructureReferences => "minecraft:structure_references",
            Self::Biomes => "minecraft:biomes",
            Self::Noise => "minecraft:noise",
            Self::Surface => "minecraft:surface",
            Self::Carvers => "minecraft:carvers",
            Self::Features => "minecraft:features",
            Self::InitializeLight => "minecraft:initialize_light",
            Self::Light => "minecraft:light",
            Self::Spawn => "minecraft:spawn",
            Self::Full => "minecraft:full",
        }
    }

    /// Looks a status up by its namespaced identifier.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.name() == name)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A chunk in any stage of its life.
pub enum ChunkAccess {
    /// A chunk that is still being generated.
    Proto(ProtoChunk),
    /// A chunk that reached [`ChunkStatus::Full`].
    Full(LevelChunk),
}

impl ChunkAccess {
    /// The position of this chunk.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        match self {
            Self::Proto(chunk) => chunk.pos(),
            Self::Full(chunk) => chunk.pos(),
        }
    }

    /// The status this chunk would be saved with.
    #[must_use]
    pub fn persisted_status(&self) -> ChunkStatus {
        match self {
            Self::Proto(chunk) => chunk.persisted_status(),
            Self::Full(_) => ChunkStatus::Full,
        }
    }

    /// Marks the chunk as modified since it was last saved.
    pub fn mark_dirty(&self) {
        match self {
            Self::Proto(chunk) => chunk.mark_dirty(),
            Self::Full(chunk) => chunk.mark_dirty(),
        }
    }

    /// Returns true if the chunk changed since it was last saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Proto(chunk) => chunk.is_dirty(),
            Self::Full(chunk) => chunk.is_dirty(),
        }
    }

    /// Height of the highest generated block in the column at local `(x, z)`.
    #[must_use]
    pub fn get_height(&self, x: usize, z: usize) -> i32 {
        match self {
            Self::Proto(chunk) => chunk.get_height(x, z),
            Self::Full(chunk) => chunk.get_height(x, z),
        }
    }

    /// Returns the proto chunk, if this chunk is not full yet.
    #[must_use]
    pub fn as_proto(&self) -> Option<&ProtoChunk> {
        match self {
            Self::Proto(chunk) => Some(chunk),
            Self::Full(_) => None,
        }
    }

    /// Snapshots the chunk for storage and clears its dirty flag.
    #[must_use]
    pub fn to_saved(&self) -> SavedChunk {
        match self {
            Self::Proto(chunk) => chunk.to_saved(),
            Self::Full(chunk) => chunk.to_saved(),
        }
    }
}
