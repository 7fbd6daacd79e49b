use anyhow::{anyhow, bail, Context, Result};
use glam::{Vec2, Vec3};
use half::f16;
use image::ImageReader;
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IRRADIANCE_FACE_SIZE: u32 = 32;
const RADIANCE_FACE_SIZE: u32 = 64;
const RADIANCE_MIP_LEVELS: u32 = 5;
const IRRADIANCE_SAMPLES: u32 = 64;
const RADIANCE_SAMPLES: u32 = 64;

/// Ref-counted store of image-based lighting environments. The procedural sky
/// is registered up front and never unloads, so a valid key always exists even
/// without a configured environment directory.
pub struct EnvironmentRegistry {
    entries: HashMap<String, EnvironmentEntry>,
    default_key: String,
    sampler: Option<Arc<wgpu::Sampler>>,
}

enum EnvironmentSource {
    Builtin,
    File(PathBuf),
}

struct EnvironmentEntry {
    label: String,
    source: EnvironmentSource,
    maps: Option<EnvironmentMaps>,
    gpu: Option<Arc<EnvironmentGpu>>,
    refs: usize,
}

impl EnvironmentEntry {
    fn builtin(label: &str, maps: EnvironmentMaps) -> Self {
        Self {
            label: label.to_string(),
            source: EnvironmentSource::Builtin,
            maps: Some(maps),
            gpu: None,
            refs: 1,
        }
    }

    fn from_file(path: PathBuf) -> Result<Self> {
        let maps = EnvironmentMaps::build(&load_panorama(&path)?);
        let label = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("environment").to_string();
        Ok(Self {
            label,
            source: EnvironmentSource::File(path),
            maps: Some(maps),
            gpu: None,
            refs: 0,
        })
    }

    fn is_builtin(&self) -> bool {
        matches!(self.source, EnvironmentSource::Builtin)
    }
}

/// CPU-side cubemap data: a single irradiance mip plus a prefiltered radiance
/// chain, RGBA f32 texels per face.
struct EnvironmentMaps {
    irradiance: CubeMip,
    radiance: Vec<CubeMip>,
}

struct CubeMip {
    size: u32,
    faces: [Vec<f32>; 6],
}

struct Panorama {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

pub struct EnvironmentGpu {
    _irradiance: wgpu::Texture,
    irradiance_view: wgpu::TextureView,
    _radiance: wgpu::Texture,
    radiance_view: wgpu::TextureView,
    sampler: Arc<wgpu::Sampler>,
    radiance_mip_count: u32,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        let sky = EnvironmentEntry::builtin("Procedural Sky", EnvironmentMaps::build(&procedural_sky()));
        let default_key = "environment::procedural_sky".to_string();
        let mut entries = HashMap::new();
        entries.insert(default_key.clone(), sky);
        Self { entries, default_key, sampler: None }
    }

    /// Registers every supported image in `dir` under a slug key derived from
    /// its file stem. Already-registered keys and unreadable entries are
    /// skipped; a missing directory is not an error.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let listing = fs::read_dir(dir)
            .with_context(|| format!("reading environment directory '{}'", dir.display()))?;
        let mut added = Vec::new();
        for entry in listing {
            let path = entry?.path();
            if !path.is_file() || !has_environment_extension(&path) {
                continue;
            }
            let Some(key) = key_for_path(&path) else {
                continue;
            };
            if self.entries.contains_key(&key) {
                continue;
            }
            let entry = EnvironmentEntry::from_file(path.clone())
                .with_context(|| format!("processing environment '{}'", path.display()))?;
            self.entries.insert(key.clone(), entry);
            added.push(key);
        }
        Ok(added)
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// `(key, label)` pairs for every registered environment, in no
    /// particular order.
    pub fn options(&self) -> Vec<(String, String)> {
        self.entries.iter().map(|(key, entry)| (key.clone(), entry.label.clone())).collect()
    }

    /// Marks `key` as in use. Unknown keys are an error so a stale selection
    /// surfaces instead of silently falling back.
    pub fn retain(&mut self, key: &str) -> Result<()> {
        let entry =
            self.entries.get_mut(key).ok_or_else(|| anyhow!("Environment '{key}' is not registered"))?;
        entry.refs = entry.refs.saturating_add(1);
        Ok(())
    }

    /// Drops one reference. CPU maps and GPU textures unload at zero refs;
    /// the builtin sky ignores releases entirely.
    pub fn release(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.is_builtin() {
            return true;
        }
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entry.maps = None;
            entry.gpu = None;
        }
        true
    }

    /// Resolves the uploaded cubemaps for `key`, rebuilding the CPU maps from
    /// the source file if a release evicted them.
    pub fn ensure_gpu(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        key: &str,
    ) -> Result<Arc<EnvironmentGpu>> {
        let sampler = self.ensure_sampler(device);
        let entry =
            self.entries.get_mut(key).ok_or_else(|| anyhow!("Environment '{key}' is not registered"))?;
        if let Some(gpu) = entry.gpu.as_ref() {
            return Ok(gpu.clone());
        }
        if entry.maps.is_none() {
            let EnvironmentSource::File(path) = &entry.source else {
                bail!("Environment '{key}' lost its generated maps");
            };
            let panorama = load_panorama(path)
                .with_context(|| format!("Failed to reload environment '{key}' from {}", path.display()))?;
            entry.maps = Some(EnvironmentMaps::build(&panorama));
        }
        let maps = entry.maps.as_ref().context("Environment maps missing after rebuild")?;
        let gpu = Arc::new(
            EnvironmentGpu::upload(device, queue, maps, sampler)
                .with_context(|| format!("Failed to upload environment '{key}'"))?,
        );
        entry.gpu = Some(gpu.clone());
        Ok(gpu)
    }

    fn ensure_sampler(&mut self, device: &wgpu::Device) -> Arc<wgpu::Sampler> {
        self.sampler
            .get_or_insert_with(|| {
                Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("Environment Map Sampler"),
                    address_mode_u: wgpu::AddressMode::ClampToEdge,
                    address_mode_v: wgpu::AddressMode::ClampToEdge,
                    address_mode_w: wgpu::AddressMode::ClampToEdge,
                    mag_filter: wgpu::FilterMode::Linear,
                    min_filter: wgpu::FilterMode::Linear,
                    mipmap_filter: wgpu::FilterMode::Linear,
                    ..Default::default()
                }))
            })
            .clone()
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentMaps {
    fn build(pano: &Panorama) -> Self {
        let irradiance = render_cube(IRRADIANCE_FACE_SIZE, |normal| integrate_irradiance(pano, normal));
        let radiance = (0..RADIANCE_MIP_LEVELS)
            .map(|mip| {
                let size = (RADIANCE_FACE_SIZE >> mip).max(1);
                let roughness = mip as f32 / (RADIANCE_MIP_LEVELS - 1).max(1) as f32;
                render_cube(size, |reflection| prefilter_radiance(pano, reflection, roughness))
            })
            .collect();
        Self { irradiance, radiance }
    }
}

impl EnvironmentGpu {
    fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        maps: &EnvironmentMaps,
        sampler: Arc<wgpu::Sampler>,
    ) -> Result<Self> {
        let (irradiance, irradiance_view) =
            upload_cube(device, queue, "Environment Irradiance", std::slice::from_ref(&maps.irradiance))?;
        let (radiance, radiance_view) =
            upload_cube(device, queue, "Environment Radiance", &maps.radiance)?;
        Ok(Self {
            _irradiance: irradiance,
            irradiance_view,
            _radiance: radiance,
            radiance_view,
            sampler,
            radiance_mip_count: maps.radiance.len().max(1) as u32,
        })
    }

    pub fn irradiance_view(&self) -> &wgpu::TextureView {
        &self.irradiance_view
    }

    pub fn radiance_view(&self) -> &wgpu::TextureView {
        &self.radiance_view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        self.sampler.as_ref()
    }

    pub fn radiance_mip_count(&self) -> u32 {
        self.radiance_mip_count
    }
}

fn upload_cube(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    mips: &[CubeMip],
) -> Result<(wgpu::Texture, wgpu::TextureView)> {
    let base = mips.first().context("Cube upload requires at least one mip level")?;
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width: base.size, height: base.size, depth_or_array_layers: 6 },
        mip_level_count: mips.len() as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    for (level, mip) in mips.iter().enumerate() {
        for (face, texels) in mip.faces.iter().enumerate() {
            let halves = half_texels(texels);
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: face as u32 },
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&halves),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(mip.size * 8),
                    rows_per_image: Some(mip.size),
                },
                wgpu::Extent3d { width: mip.size, height: mip.size, depth_or_array_layers: 1 },
            );
        }
    }
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::Cube),
        ..Default::default()
    });
    Ok((texture, view))
}

fn half_texels(values: &[f32]) -> Vec<u16> {
    values.iter().map(|value| f16::from_f32(*value).to_bits()).collect()
}

fn has_environment_extension(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
        ext.eq_ignore_ascii_case("hdr") || ext.eq_ignore_ascii_case("exr") || ext.eq_ignore_ascii_case("png")
    })
}

fn key_for_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    let slug: String = stem
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
        .collect();
    (!slug.is_empty()).then(|| format!("environment::{slug}"))
}

fn load_panorama(path: &Path) -> Result<Panorama> {
    let decoded = ImageReader::open(path)
        .with_context(|| format!("opening '{}'", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("decoding '{}'", path.display()))?;
    let rgb = decoded.to_rgb32f();
    let pixels = rgb.pixels().map(|pixel| Vec3::from_array(pixel.0)).collect();
    Ok(Panorama { width: rgb.width(), height: rgb.height(), pixels })
}

impl Panorama {
    // Wraps horizontally, clamps at the poles.
    fn texel(&self, x: i64, y: i64) -> Vec3 {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.pixels[y * self.width as usize + x]
    }

    fn sample(&self, u: f32, v: f32) -> Vec3 {
        let x = u * (self.width as f32 - 1.0);
        let y = v * (self.height as f32 - 1.0);
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }

    fn sample_direction(&self, dir: Vec3) -> Vec3 {
        let d = dir.normalize();
        let u = (d.z.atan2(d.x) + PI) / TAU;
        let v = d.y.clamp(-1.0, 1.0).acos() / PI;
        self.sample(u, v)
    }
}

fn procedural_sky() -> Panorama {
    let (width, height) = (256u32, 128u32);
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let v = y as f32 / (height - 1) as f32;
        for x in 0..width {
            let u = x as f32 / (width - 1) as f32;
            pixels.push(sky_color(u, v));
        }
    }
    Panorama { width, height, pixels }
}

fn sky_color(u: f32, v: f32) -> Vec3 {
    let zenith = Vec3::new(0.18, 0.3, 0.55);
    let horizon = Vec3::new(0.7, 0.72, 0.78);
    let ground = Vec3::new(0.16, 0.13, 0.1);
    let base = if v < 0.5 {
        zenith.lerp(horizon, v * 2.0)
    } else {
        horizon.lerp(ground, (v - 0.5) * 2.0)
    };
    let from_sun = Vec2::new(u - 0.7, v - 0.3).length();
    let halo = (1.0 - from_sun * 8.0).max(0.0).powf(10.0);
    base + Vec3::new(1.0, 0.93, 0.8) * halo * 6.0
}

fn render_cube(size: u32, shade: impl Fn(Vec3) -> Vec3) -> CubeMip {
    let mut faces: [Vec<f32>; 6] = Default::default();
    for (face, data) in faces.iter_mut().enumerate() {
        data.reserve((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = shade(face_direction(face, x, y, size));
                data.extend_from_slice(&[color.x, color.y, color.z, 1.0]);
            }
        }
    }
    CubeMip { size, faces }
}

fn integrate_irradiance(pano: &Panorama, normal: Vec3) -> Vec3 {
    let mut total = Vec3::ZERO;
    let mut weight = 0.0f32;
    for index in 0..IRRADIANCE_SAMPLES {
        let xi = sample_pair(index, IRRADIANCE_SAMPLES);
        let dir = cosine_direction(normal, xi);
        let cosine = normal.dot(dir);
        if cosine > 0.0 {
            total += pano.sample_direction(dir) * cosine;
            weight += cosine;
        }
    }
    if weight > 0.0 {
        total / weight
    } else {
        total
    }
}

fn prefilter_radiance(pano: &Panorama, reflection: Vec3, roughness: f32) -> Vec3 {
    let mut total = Vec3::ZERO;
    let mut weight = 0.0f32;
    for index in 0..RADIANCE_SAMPLES {
        let xi = sample_pair(index, RADIANCE_SAMPLES);
        let half = ggx_half_vector(reflection, xi, roughness);
        let light = (-reflection).reflect(half).normalize();
        let cosine = reflection.dot(light);
        if cosine > 0.0 {
            total += pano.sample_direction(light) * cosine;
            weight += cosine;
        }
    }
    if weight > 0.0 {
        total / weight
    } else {
        total
    }
}

// Standard cube face layout: +X, -X, +Y, -Y, +Z, -Z.
fn face_direction(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
    let s = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
    let t = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
    let dir = match face {
        0 => Vec3::new(1.0, -t, -s),
        1 => Vec3::new(-1.0, -t, s),
        2 => Vec3::new(s, 1.0, t),
        3 => Vec3::new(s, -1.0, -t),
        4 => Vec3::new(s, -t, 1.0),
        _ => Vec3::new(-s, -t, -1.0),
    };
    dir.normalize()
}

fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let helper = if normal.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = normal.cross(helper).normalize();
    (tangent, normal.cross(tangent))
}

fn cosine_direction(normal: Vec3, xi: Vec2) -> Vec3 {
    let (tangent, bitangent) = orthonormal_basis(normal);
    let radius = xi.x.sqrt();
    let azimuth = TAU * xi.y;
    tangent * (radius * azimuth.cos())
        + bitangent * (radius * azimuth.sin())
        + normal * (1.0 - xi.x).sqrt()
}

fn ggx_half_vector(normal: Vec3, xi: Vec2, roughness: f32) -> Vec3 {
    let alpha = roughness.max(1e-3);
    let cos_theta = ((1.0 - xi.y) / (1.0 + (alpha * alpha - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let azimuth = TAU * xi.x;
    let (tangent, bitangent) = orthonormal_basis(normal);
    tangent * (azimuth.cos() * sin_theta) + bitangent * (azimuth.sin() * sin_theta) + normal * cos_theta
}

fn sample_pair(index: u32, count: u32) -> Vec2 {
    Vec2::new(index as f32 / count as f32, van_der_corput(index))
}

fn van_der_corput(index: u32) -> f32 {
    index.reverse_bits() as f32 * 2.328_306_4e-10
}
