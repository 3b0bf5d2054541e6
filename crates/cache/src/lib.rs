//! Compositor Texture Cache Library
//!
//! Bounded GPU texture memory for the compositing pipeline: a hard and a
//! preferred byte budget, request tokens as the recency signal, and
//! oldest-request-first eviction of unprotected entries.

pub mod allocator;
pub mod config;
pub mod manager;
pub mod token;

pub use allocator::{TextureAllocator, TextureId};
pub use config::{ConfigError, TextureCacheConfig};
pub use manager::{TextureCacheError, TextureCacheStats, TextureMemoryManager};
pub use token::TextureToken;

pub use compositor_render::{TextureFormat, TextureSize};
