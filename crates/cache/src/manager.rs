//! Texture memory manager: admission, budgets, and eviction.
//!
//! Owns one entry per resident texture, enforces a hard and a preferred
//! byte budget, and reclaims memory from unprotected entries in
//! oldest-request-first order. Entries are admitted protected; only an
//! explicit unprotect makes them eviction-eligible, so textures the
//! current frame depends on are never pulled out from under it.

use std::collections::{BTreeSet, HashMap};

use compositor_render::{TextureFormat, TextureSize};
use log::{debug, trace, warn};

use crate::allocator::{TextureAllocator, TextureId};
use crate::config::TextureCacheConfig;
use crate::token::{TextureToken, TokenIssuer};

/// Errors from operations that require a resident token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextureCacheError {
    /// The token has never been admitted, or its entry was evicted
    #[error("texture token {0} is not resident")]
    TokenNotResident(TextureToken),
}

/// One resident texture entry.
#[derive(Debug)]
struct ManagedTexture {
    size: TextureSize,
    format: TextureFormat,
    /// Byte cost computed at admission; immutable for the entry's lifetime.
    cost_bytes: usize,
    protected: bool,
    /// Backing resource, absent until the caller materializes it.
    texture_id: Option<TextureId>,
}

/// A backing resource whose entry was evicted before an allocator was in
/// hand to destroy it.
#[derive(Debug)]
struct EvictedBacking {
    id: TextureId,
    size: TextureSize,
    format: TextureFormat,
}

/// Snapshot of cache occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureCacheStats {
    /// Number of resident textures
    pub texture_count: usize,

    /// Bytes used by resident textures
    pub memory_used: usize,

    /// Configured hard budget (bytes)
    pub max_memory_limit: usize,

    /// Configured preferred budget (bytes)
    pub preferred_memory_limit: usize,

    /// Number of entries evicted to reclaim memory
    pub evictions: u64,

    /// Number of admission requests denied at the hard budget
    pub denied_requests: u64,
}

/// Bounded-memory manager for GPU-backed compositor textures.
///
/// Callers obtain a [`TextureToken`] from [`get_token`], admit a texture
/// under it with [`request_texture`], and materialize the backing resource
/// through an injected [`TextureAllocator`] with [`allocate_texture`].
/// Admitted entries stay protected from eviction until the caller drops
/// protection with [`unprotect_texture`].
///
/// Eviction never touches protected entries and always reclaims the
/// unprotected entry with the smallest token first, so the textures least
/// recently requested go first.
///
/// [`get_token`]: TextureMemoryManager::get_token
/// [`request_texture`]: TextureMemoryManager::request_texture
/// [`allocate_texture`]: TextureMemoryManager::allocate_texture
/// [`unprotect_texture`]: TextureMemoryManager::unprotect_texture
///
/// # Example
///
/// ```
/// use compositor_cache::{
///     TextureAllocator, TextureCacheConfig, TextureFormat, TextureId, TextureMemoryManager,
///     TextureSize,
/// };
///
/// struct NullAllocator(u32);
///
/// impl TextureAllocator for NullAllocator {
///     fn create_texture(&mut self, _size: TextureSize, _format: TextureFormat) -> TextureId {
///         self.0 += 1;
///         TextureId::new(self.0)
///     }
///     fn delete_texture(&mut self, _id: TextureId, _size: TextureSize, _format: TextureFormat) {}
/// }
///
/// let mut manager = TextureMemoryManager::new(TextureCacheConfig::default());
/// let mut allocator = NullAllocator(0);
///
/// let token = manager.get_token();
/// assert!(manager.request_texture(token, TextureSize::new(256, 256), TextureFormat::Rgba8));
/// let id = manager.allocate_texture(&mut allocator, token).unwrap();
/// assert_eq!(manager.texture_id(token), Some(id));
///
/// // Done compositing with it; let budget pressure reclaim it later.
/// manager.unprotect_texture(token);
/// ```
pub struct TextureMemoryManager {
    /// Resident entries, keyed by owning token.
    textures: HashMap<TextureToken, ManagedTexture>,

    /// Unprotected resident tokens in ascending order; the first element
    /// is always the next eviction victim.
    unprotected: BTreeSet<TextureToken>,

    /// Exact sum of resident entry costs.
    current_use: usize,

    /// Hard budget in bytes.
    max_limit: usize,

    /// Preferred budget in bytes.
    preferred_limit: usize,

    /// Allocation granularity carried from configuration.
    allocation_granularity: usize,

    issuer: TokenIssuer,

    /// Backings evicted while no allocator was in hand, awaiting
    /// destruction.
    evicted: Vec<EvictedBacking>,

    evictions: u64,
    denied_requests: u64,
}

impl TextureMemoryManager {
    /// Creates an empty manager with the given budgets.
    pub fn new(config: TextureCacheConfig) -> Self {
        Self {
            textures: HashMap::new(),
            unprotected: BTreeSet::new(),
            current_use: 0,
            max_limit: config.max_bytes,
            preferred_limit: config.preferred_bytes,
            allocation_granularity: config.allocation_granularity,
            issuer: TokenIssuer::default(),
            evicted: Vec::new(),
            evictions: 0,
            denied_requests: 0,
        }
    }

    /// Convenience constructor from raw byte budgets.
    pub fn with_limits(max_bytes: usize, preferred_bytes: usize) -> Self {
        Self::new(TextureCacheConfig {
            max_bytes,
            preferred_bytes,
            ..Default::default()
        })
    }

    /// Bytes of GPU memory a texture of this size and format occupies.
    ///
    /// Pure helper; callers and tests use it to express budgets in
    /// equivalent-texture-count terms.
    pub fn memory_use_bytes(size: TextureSize, format: TextureFormat) -> usize {
        size.pixel_count() * format.bytes_per_pixel()
    }

    /// Issues the next request token, strictly greater than every token
    /// issued before it by this manager.
    pub fn get_token(&mut self) -> TextureToken {
        self.issuer.next_token()
    }

    /// Retires a token, evicting its entry if one is still resident.
    /// A no-op for tokens that were never admitted or already evicted.
    pub fn release_token(&mut self, token: TextureToken) {
        if self.textures.contains_key(&token) {
            self.evict(token);
        }
    }

    /// Requests cache residency for a texture under `token`.
    ///
    /// Evicts unprotected entries oldest-first until the new entry fits
    /// under the hard budget; fails (returning `false`, admitting nothing)
    /// if it still cannot fit. On success the entry is inserted protected
    /// and usage is then trimmed back toward the preferred budget, which
    /// can only reclaim older unprotected entries.
    ///
    /// `token` must not already be resident.
    pub fn request_texture(
        &mut self,
        token: TextureToken,
        size: TextureSize,
        format: TextureFormat,
    ) -> bool {
        debug_assert!(
            !self.textures.contains_key(&token),
            "token {token} is already resident"
        );

        let cost = Self::memory_use_bytes(size, format);
        if cost > self.max_limit {
            self.denied_requests += 1;
            debug!(
                "denied texture request {token}: {cost} bytes exceeds the {} byte max budget",
                self.max_limit
            );
            return false;
        }

        // Make room under the hard ceiling out of unprotected entries.
        let headroom = self.max_limit - cost;
        self.reduce_memory_to_limit(headroom);
        if self.current_use + cost > self.max_limit {
            self.denied_requests += 1;
            debug!("denied texture request {token}: only protected entries remain");
            return false;
        }

        self.textures.insert(
            token,
            ManagedTexture {
                size,
                format,
                cost_bytes: cost,
                protected: true,
                texture_id: None,
            },
        );
        self.current_use += cost;
        trace!(
            "admitted texture {token} ({cost} bytes), use now {} bytes",
            self.current_use
        );

        // The new entry is protected, so this only reclaims older ones.
        if self.current_use > self.preferred_limit {
            let preferred = self.preferred_limit;
            self.reduce_memory_to_limit(preferred);
        }
        true
    }

    /// Materializes the backing resource for a resident entry.
    ///
    /// Idempotent: at most one backing is ever created per entry, and a
    /// second call returns the stored id without touching the allocator.
    pub fn allocate_texture(
        &mut self,
        allocator: &mut dyn TextureAllocator,
        token: TextureToken,
    ) -> Result<TextureId, TextureCacheError> {
        let entry = self
            .textures
            .get_mut(&token)
            .ok_or(TextureCacheError::TokenNotResident(token))?;
        if let Some(id) = entry.texture_id {
            return Ok(id);
        }
        let id = allocator.create_texture(entry.size, entry.format);
        entry.texture_id = Some(id);
        Ok(id)
    }

    /// True iff the token currently names a resident entry.
    pub fn has_texture(&self, token: TextureToken) -> bool {
        self.textures.contains_key(&token)
    }

    /// True iff the token is resident and protected. False for
    /// non-resident tokens.
    pub fn is_protected(&self, token: TextureToken) -> bool {
        self.textures.get(&token).is_some_and(|t| t.protected)
    }

    /// Backing resource id for a resident entry, if materialized.
    pub fn texture_id(&self, token: TextureToken) -> Option<TextureId> {
        self.textures.get(&token).and_then(|t| t.texture_id)
    }

    /// Re-protects a resident entry, exempting it from eviction again.
    /// A no-op if the entry is already protected or not resident.
    pub fn protect_texture(&mut self, token: TextureToken) {
        if let Some(entry) = self.textures.get_mut(&token) {
            if !entry.protected {
                entry.protected = true;
                self.unprotected.remove(&token);
            }
        }
    }

    /// Marks a resident entry eviction-eligible. Does not itself evict
    /// anything or change usage. A no-op for non-resident tokens.
    pub fn unprotect_texture(&mut self, token: TextureToken) {
        if let Some(entry) = self.textures.get_mut(&token) {
            if entry.protected {
                entry.protected = false;
                self.unprotected.insert(token);
            }
        }
    }

    /// Drops protection from every resident entry.
    pub fn unprotect_all_textures(&mut self) {
        for (token, entry) in self.textures.iter_mut() {
            if entry.protected {
                entry.protected = false;
                self.unprotected.insert(*token);
            }
        }
    }

    /// Exact sum of resident entry costs in bytes.
    pub fn current_memory_use_bytes(&self) -> usize {
        self.current_use
    }

    /// Configured hard budget in bytes.
    pub fn max_memory_limit_bytes(&self) -> usize {
        self.max_limit
    }

    /// Configured preferred budget in bytes.
    pub fn preferred_memory_limit_bytes(&self) -> usize {
        self.preferred_limit
    }

    /// Allocation granularity carried from configuration.
    pub fn allocation_granularity(&self) -> usize {
        self.allocation_granularity
    }

    /// Current occupancy and lifetime counters.
    pub fn stats(&self) -> TextureCacheStats {
        TextureCacheStats {
            texture_count: self.textures.len(),
            memory_used: self.current_use,
            max_memory_limit: self.max_limit,
            preferred_memory_limit: self.preferred_limit,
            evictions: self.evictions,
            denied_requests: self.denied_requests,
        }
    }

    /// Evicts unprotected entries, oldest token first, until usage is at
    /// or below `limit_bytes` or nothing unprotected remains. The stored
    /// budgets are untouched; this is a one-shot trim.
    pub fn reduce_memory_to_limit(&mut self, limit_bytes: usize) {
        while self.current_use > limit_bytes {
            let Some(&victim) = self.unprotected.first() else {
                debug!(
                    "cannot reduce texture memory below {} bytes: remaining entries are protected",
                    self.current_use
                );
                break;
            };
            self.evict(victim);
        }
    }

    /// Stores a new hard budget and immediately trims usage back under it
    /// wherever unprotected entries allow.
    pub fn set_max_memory_limit_bytes(&mut self, bytes: usize) {
        self.max_limit = bytes;
        self.reduce_memory_to_limit(bytes);
        if self.current_use > bytes {
            warn!(
                "texture memory still {} bytes after lowering max budget to {bytes}: \
                 remaining entries are protected",
                self.current_use
            );
        }
    }

    /// Stores a new preferred budget. No eviction happens now; the new
    /// value takes effect at the next admission or explicit trim.
    pub fn set_preferred_memory_limit_bytes(&mut self, bytes: usize) {
        self.preferred_limit = bytes;
    }

    /// Destroys every backing queued by eviction. Each backing is
    /// destroyed exactly once.
    pub fn delete_evicted_textures(&mut self, allocator: &mut dyn TextureAllocator) {
        for backing in self.evicted.drain(..) {
            allocator.delete_texture(backing.id, backing.size, backing.format);
        }
    }

    /// Tears the whole cache down: every entry is unprotected, evicted,
    /// and its backing destroyed. Used when the compositor loses its
    /// graphics context.
    pub fn evict_and_delete_all_textures(&mut self, allocator: &mut dyn TextureAllocator) {
        self.unprotect_all_textures();
        self.reduce_memory_to_limit(0);
        self.delete_evicted_textures(allocator);
    }

    /// Number of evicted backings awaiting destruction.
    pub fn evicted_backing_count(&self) -> usize {
        self.evicted.len()
    }

    /// Removes one resident entry and updates accounting. A materialized
    /// backing cannot be destroyed here (no allocator in hand), so it is
    /// queued for [`delete_evicted_textures`].
    ///
    /// [`delete_evicted_textures`]: TextureMemoryManager::delete_evicted_textures
    fn evict(&mut self, token: TextureToken) {
        let Some(entry) = self.textures.remove(&token) else {
            return;
        };
        self.unprotected.remove(&token);
        self.current_use -= entry.cost_bytes;
        self.evictions += 1;
        if let Some(id) = entry.texture_id {
            self.evicted.push(EvictedBacking {
                id,
                size: entry.size,
                format: entry.format,
            });
        }
        debug!(
            "evicted texture {token} ({} bytes), use now {} bytes",
            entry.cost_bytes, self.current_use
        );
    }
}
