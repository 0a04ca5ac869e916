use std::collections::HashMap;

use anyhow::Result;
use log::warn;

use super::{GpuDevice, TextureDesc, TextureId, TexturePool};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
}

/// Reuses released render targets whose descriptor matches the request.
#[derive(Debug, Default)]
pub struct ScratchTexturePool {
    free: Vec<(TextureDesc, TextureId)>,
    outstanding: HashMap<TextureId, TextureDesc>,
    stats: PoolStats,
}

impl ScratchTexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Textures handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Destroy every idle texture.
    pub fn purge(&mut self, device: &mut dyn GpuDevice) {
        for (_, texture) in self.free.drain(..) {
            device.destroy_texture(texture);
        }
    }
}

impl TexturePool for ScratchTexturePool {
    fn acquire(&mut self, device: &mut dyn GpuDevice, desc: &TextureDesc) -> Result<TextureId> {
        let texture = match self.free.iter().position(|(d, _)| d == desc) {
            Some(i) => self.free.swap_remove(i).1,
            None => {
                let texture = device.create_texture(desc)?;
                self.stats.created += 1;
                texture
            }
        };
        self.outstanding.insert(texture, *desc);
        self.stats.acquired += 1;
        Ok(texture)
    }

    fn release(&mut self, texture: TextureId) {
        let Some(desc) = self.outstanding.remove(&texture) else {
            warn!("released {texture} which is not on loan from this pool");
            return;
        };
        self.stats.released += 1;
        self.free.push((desc, texture));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn test_released_textures_are_reused_by_descriptor() {
        let mut device = HeadlessDevice::new([8, 8]);
        let mut pool = ScratchTexturePool::new();
        let small = TextureDesc::rgba8(4, 4);
        let big = TextureDesc::rgba8(16, 16);

        let a = pool.acquire(&mut device, &small).unwrap();
        pool.release(a);
        let b = pool.acquire(&mut device, &big).unwrap();
        let c = pool.acquire(&mut device, &small).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut device = HeadlessDevice::new([8, 8]);
        let mut pool = ScratchTexturePool::new();
        let t = pool.acquire(&mut device, &TextureDesc::rgba8(2, 2)).unwrap();
        pool.release(t);
        pool.release(t);
        assert_eq!(pool.stats().released, 1);
        assert_eq!(pool.free_count(), 1);

        pool.purge(&mut device);
        assert_eq!(pool.free_count(), 0);
        assert!(device.texture_desc(t).is_none());
    }
}
