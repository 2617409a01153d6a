//! Descriptor sets keyed by (sampler, view).
//!
//! The cache is an explicit context object owned by the renderer and shared
//! by all viewports. It has no internal locking; callers serialize access.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{
    DescriptorSetHandle, DescriptorSetLayoutHandle, GpuBackend, ImageViewHandle, SamplerHandle,
};
use crate::error::GraphicsResult;

/// Lazily created combined-image-sampler descriptor sets.
///
/// Entries are never evicted during normal operation. [`forget_view`](Self::forget_view)
/// drops the entries of a view that is about to be destroyed, and
/// [`clear`](Self::clear) frees everything at shutdown.
pub struct DescriptorCache {
    backend: Arc<dyn GpuBackend>,
    layout: DescriptorSetLayoutHandle,
    entries: HashMap<(SamplerHandle, ImageViewHandle), DescriptorSetHandle>,
}

impl DescriptorCache {
    pub fn new(backend: &Arc<dyn GpuBackend>, layout: DescriptorSetLayoutHandle) -> Self {
        Self {
            backend: Arc::clone(backend),
            layout,
            entries: HashMap::new(),
        }
    }

    /// Descriptor set binding `view` with `sampler`, created on first use.
    ///
    /// Fails with `AllocationFailure` when the descriptor pool is exhausted.
    pub fn get(
        &mut self,
        sampler: SamplerHandle,
        view: ImageViewHandle,
    ) -> GraphicsResult<DescriptorSetHandle> {
        if let Some(set) = self.entries.get(&(sampler, view)) {
            return Ok(*set);
        }
        let set = self.backend.allocate_descriptor_set(self.layout)?;
        self.backend.write_image_descriptor(set, sampler, view);
        self.entries.insert((sampler, view), set);
        log::trace!(
            "Cached descriptor {:?} for {:?} + {:?} ({} entries)",
            set,
            sampler,
            view,
            self.entries.len()
        );
        Ok(set)
    }

    /// Free every entry that references `view`.
    ///
    /// Only valid once no submitted frame uses those descriptors.
    pub fn forget_view(&mut self, view: ImageViewHandle) {
        let backend = &self.backend;
        self.entries.retain(|(_, v), set| {
            if *v == view {
                backend.free_descriptor_set(*set);
                false
            } else {
                true
            }
        });
    }

    /// Free every entry.
    pub fn clear(&mut self) {
        for (_, set) in self.entries.drain() {
            self.backend.free_descriptor_set(set);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("layout", &self.layout)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Drop for DescriptorCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::error::GraphicsError;

    fn cache() -> (Arc<DummyBackend>, DescriptorCache) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let cache = DescriptorCache::new(&backend, DescriptorSetLayoutHandle::from_raw(1));
        (dummy, cache)
    }

    #[test]
    fn test_forget_view_frees_only_its_entries() {
        let (dummy, mut cache) = cache();
        let sampler = SamplerHandle::from_raw(10);
        let a = ImageViewHandle::from_raw(20);
        let b = ImageViewHandle::from_raw(21);
        cache.get(sampler, a).unwrap();
        cache.get(sampler, b).unwrap();

        cache.forget_view(a);

        assert_eq!(cache.len(), 1);
        assert_eq!(dummy.live_handles().descriptor_sets, 1);
    }

    #[test]
    fn test_pool_exhaustion_is_allocation_failure() {
        let (dummy, mut cache) = cache();
        dummy.set_descriptor_set_limit(Some(1));
        let sampler = SamplerHandle::from_raw(10);
        cache.get(sampler, ImageViewHandle::from_raw(20)).unwrap();

        let result = cache.get(sampler, ImageViewHandle::from_raw(21));
        assert!(matches!(result, Err(GraphicsError::AllocationFailure(_))));
    }

    #[test]
    fn test_drop_frees_all_sets() {
        let (dummy, mut cache) = cache();
        cache
            .get(SamplerHandle::from_raw(10), ImageViewHandle::from_raw(20))
            .unwrap();
        drop(cache);
        assert_eq!(dummy.live_handles().descriptor_sets, 0);
    }
}
