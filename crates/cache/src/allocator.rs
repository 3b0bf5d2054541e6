//! Backing resource allocation capability.
//!
//! The manager never talks to the graphics API itself. Creating and
//! destroying the actual GPU resources is delegated to an injected
//! allocator, so the budget and eviction logic can run against a fake in
//! tests.

use compositor_render::{TextureFormat, TextureSize};

/// Opaque handle to a backing graphics resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u32);

impl TextureId {
    /// Wrap a raw resource id produced by an allocator.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw resource id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Creates and destroys backing GPU resources for cache entries.
///
/// Failure semantics of creation are the allocator's business; the manager
/// assumes a returned id is valid.
pub trait TextureAllocator {
    /// Allocate a backing resource sized and typed for one entry.
    fn create_texture(&mut self, size: TextureSize, format: TextureFormat) -> TextureId;

    /// Release a backing resource. Called exactly once per created id.
    fn delete_texture(&mut self, id: TextureId, size: TextureSize, format: TextureFormat);
}
