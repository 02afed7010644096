//! CPU-writable mirror of the preview texture

use std::ops::{Deref, DerefMut};

use super::frame::{Extent, PixelFormat};

/// Pixel format of every staging texture
pub const STAGING_FORMAT: PixelFormat = PixelFormat::Bgra8;

/// CPU-side buffer that is copied to the GPU texture after each write
///
/// Dimensions are fixed at allocation. Writing goes through [`map_write`],
/// whose guard must be dropped (unmapping the buffer) before the texture can
/// be borrowed again for upload.
///
/// [`map_write`]: StagingTexture::map_write
#[derive(Debug)]
pub struct StagingTexture {
    extent: Extent,
    data: Vec<u8>,
    revision: u64,
}

impl StagingTexture {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            data: vec![0; extent.byte_len(STAGING_FORMAT)],
            revision: 0,
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn format(&self) -> PixelFormat {
        STAGING_FORMAT
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of completed write mappings
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn map_write(&mut self) -> StagingWrite<'_> {
        StagingWrite { texture: self }
    }
}

/// Write mapping of a [`StagingTexture`]; unmaps on drop
pub struct StagingWrite<'a> {
    texture: &'a mut StagingTexture,
}

impl Deref for StagingWrite<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.texture.data
    }
}

impl DerefMut for StagingWrite<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.texture.data
    }
}

impl Drop for StagingWrite<'_> {
    fn drop(&mut self) {
        self.texture.revision += 1;
    }
}
