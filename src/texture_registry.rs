use anyhow::{anyhow, bail, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::channel_mask::pixel_buffer_len;

pub const CUBE_FACE_COUNT: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    Flat,
    Cube,
}

impl TextureKind {
    pub fn layer_count(self) -> u32 {
        match self {
            TextureKind::Flat => 1,
            TextureKind::Cube => CUBE_FACE_COUNT,
        }
    }
}

/// GPU mirror of a registry record. Source textures stay linear so extraction
/// readbacks reproduce the uploaded bytes exactly.
pub struct TextureGpu {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl TextureGpu {
    /// A 2D view of a single layer, used to blit one cube face at a time.
    pub fn face_view(&self, face: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Registry Face View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

pub struct TextureRecord {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
    pub invert_y: bool,
    pixels: Vec<u8>,
    gpu: Option<Arc<TextureGpu>>,
}

impl TextureRecord {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn face_pixels(&self, face: u32) -> Option<&[u8]> {
        if face >= self.kind.layer_count() {
            return None;
        }
        let face_len = pixel_buffer_len(self.width, self.height);
        let start = face as usize * face_len;
        self.pixels.get(start..start + face_len)
    }
}

#[derive(Default)]
pub struct TextureRegistry {
    records: HashMap<String, TextureRecord>,
    revision: u64,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&TextureRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.records.remove(name).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    pub fn insert_pixels(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        invert_y: bool,
        pixels: Vec<u8>,
    ) -> Result<()> {
        let expected = pixel_buffer_len(width, height);
        if pixels.len() != expected {
            bail!(
                "Texture '{name}' pixel buffer is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            );
        }
        self.records.insert(
            name.to_string(),
            TextureRecord {
                name: name.to_string(),
                width,
                height,
                kind: TextureKind::Flat,
                invert_y,
                pixels,
                gpu: None,
            },
        );
        self.revision += 1;
        Ok(())
    }

    pub fn insert_cube(
        &mut self,
        name: &str,
        face_size: u32,
        invert_y: bool,
        faces: Vec<u8>,
    ) -> Result<()> {
        let expected = pixel_buffer_len(face_size, face_size) * CUBE_FACE_COUNT as usize;
        if faces.len() != expected {
            bail!(
                "Cube texture '{name}' pixel buffer is {} bytes, expected {expected} for six {face_size}x{face_size} faces",
                faces.len()
            );
        }
        self.records.insert(
            name.to_string(),
            TextureRecord {
                name: name.to_string(),
                width: face_size,
                height: face_size,
                kind: TextureKind::Cube,
                invert_y,
                pixels: faces,
                gpu: None,
            },
        );
        self.revision += 1;
        Ok(())
    }

    /// Procedural checkerboard with per-cell tint jitter. Useful as a default
    /// inspection subject before any file is loaded.
    pub fn insert_test_pattern(&mut self, name: &str, width: u32, height: u32) -> Result<()> {
        let mut rng = rand::thread_rng();
        let cell = 16u32.min(width.max(1)).min(height.max(1));
        let mut pixels = Vec::with_capacity(pixel_buffer_len(width, height));
        let mut tints: HashMap<(u32, u32), [u8; 3]> = HashMap::new();
        for y in 0..height {
            for x in 0..width {
                let cx = x / cell;
                let cy = y / cell;
                let tint = *tints
                    .entry((cx, cy))
                    .or_insert_with(|| [rng.gen_range(96..=255), rng.gen_range(96..=255), rng.gen_range(96..=255)]);
                let dark = (cx + cy) % 2 == 0;
                let shade = if dark { 0.35 } else { 1.0 };
                pixels.push((tint[0] as f32 * shade) as u8);
                pixels.push((tint[1] as f32 * shade) as u8);
                pixels.push((tint[2] as f32 * shade) as u8);
                pixels.push(255);
            }
        }
        self.insert_pixels(name, width, height, false, pixels)
    }

    pub fn ensure_gpu(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        name: &str,
    ) -> Result<Arc<TextureGpu>> {
        let record =
            self.records.get_mut(name).ok_or_else(|| anyhow!("Unknown texture '{name}'"))?;
        if let Some(gpu) = record.gpu.as_ref() {
            return Ok(gpu.clone());
        }
        if record.width == 0 || record.height == 0 {
            bail!("Texture '{name}' has zero extent");
        }
        let layers = record.kind.layer_count();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Registry Texture"),
            size: wgpu::Extent3d {
                width: record.width,
                height: record.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view_dimension = match record.kind {
            TextureKind::Flat => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Registry Texture View"),
            dimension: Some(view_dimension),
            ..Default::default()
        });
        let gpu = Arc::new(TextureGpu { texture, view });
        upload_layers(queue, &gpu, record.width, record.height, record.kind, &record.pixels);
        record.gpu = Some(gpu.clone());
        Ok(gpu)
    }
}

fn upload_layers(
    queue: &wgpu::Queue,
    gpu: &TextureGpu,
    width: u32,
    height: u32,
    kind: TextureKind,
    pixels: &[u8],
) {
    let layer_len = pixel_buffer_len(width, height);
    for layer in 0..kind.layer_count() {
        let start = layer as usize * layer_len;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            &pixels[start..start + layer_len],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
    }
}
