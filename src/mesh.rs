use anyhow::{anyhow, bail, Context, Result};
use glam::{Vec2, Vec3};
use gltf::mesh::Mode;
use std::path::Path;

/// Vertex layout shared by every preview draw: position, normal, uv.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position: position.to_array(), normal: normal.to_array(), uv: uv.to_array() }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
    pub bounds: MeshBounds,
}

/// One draw range of the merged index buffer. `material` indexes into
/// `MeshImport::materials`; `None` draws with default factors.
#[derive(Clone, Debug)]
pub struct MeshSubset {
    pub name: Option<String>,
    pub index_offset: u32,
    pub index_count: u32,
    pub material: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

impl MeshBounds {
    pub fn from_vertices(vertices: &[MeshVertex]) -> Self {
        if vertices.is_empty() {
            return Self { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for vertex in vertices {
            let position = Vec3::from_array(vertex.position);
            min = min.min(position);
            max = max.max(position);
        }
        let center = (min + max) * 0.5;
        let radius = vertices
            .iter()
            .map(|vertex| (Vec3::from_array(vertex.position) - center).length())
            .fold(0.0f32, f32::max);
        Self { min, max, center, radius }
    }
}

/// Decoded image referenced by a material's base color slot.
#[derive(Clone, Debug)]
pub struct ImportedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ImportedMaterial {
    pub label: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub base_color_texture: Option<usize>,
}

impl ImportedMaterial {
    /// Authored PBR means anything beyond the glTF defaults: a base color
    /// texture or non-default metal/rough factors.
    pub fn is_pbr_authored(&self) -> bool {
        self.base_color_texture.is_some() || self.metallic_factor > 0.0 || self.roughness_factor < 1.0
    }
}

#[derive(Clone, Debug)]
pub struct MeshImport {
    pub mesh: Mesh,
    pub materials: Vec<ImportedMaterial>,
    pub textures: Vec<ImportedTexture>,
}

impl MeshImport {
    pub fn has_pbr_materials(&self) -> bool {
        self.materials.iter().any(ImportedMaterial::is_pbr_authored)
    }
}

/// Imports the first mesh of a glTF file, merging its triangle primitives
/// into a single vertex/index pair with one subset per primitive.
pub fn load_gltf_with_materials(path: impl AsRef<Path>) -> Result<MeshImport> {
    let path = path.as_ref();
    let (document, buffers, images) =
        gltf::import(path).with_context(|| format!("Failed to import glTF from {}", path.display()))?;
    let source_mesh =
        document.meshes().next().ok_or_else(|| anyhow!("No meshes found in {}", path.display()))?;

    let textures = collect_textures(&document, &images, path)?;
    let materials = collect_materials(&document);

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut subsets = Vec::new();
    for (primitive_index, primitive) in source_mesh.primitives().enumerate() {
        if primitive.mode() != Mode::Triangles {
            continue;
        }
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
        let positions: Vec<Vec3> = reader
            .read_positions()
            .ok_or_else(|| anyhow!("POSITION attribute missing in {}", path.display()))?
            .map(Vec3::from_array)
            .collect();
        if positions.is_empty() {
            continue;
        }
        let normals = reader.read_normals().map(|iter| iter.map(Vec3::from_array).collect());
        let uvs = reader
            .read_tex_coords(0)
            .map(|coords| coords.into_f32().map(Vec2::from_array).collect());
        let local_indices = reader.read_indices().map(|read| read.into_u32().collect());

        let (index_offset, index_count) =
            append_primitive(&mut vertices, &mut indices, positions, normals, uvs, local_indices);
        let name = source_mesh
            .name()
            .map(|base| format!("{base}::{primitive_index}"))
            .or_else(|| Some(format!("primitive_{primitive_index}")));
        subsets.push(MeshSubset {
            name,
            index_offset,
            index_count,
            material: primitive.material().index(),
        });
    }

    if subsets.is_empty() {
        bail!("Mesh in {} contains no triangle primitives", path.display());
    }
    let bounds = MeshBounds::from_vertices(&vertices);
    Ok(MeshImport { mesh: Mesh { vertices, indices, subsets, bounds }, materials, textures })
}

/// Copies one primitive into the shared buffers, filling in whatever
/// attributes the file left out. Returns the subset's index range.
fn append_primitive(
    vertices: &mut Vec<MeshVertex>,
    indices: &mut Vec<u32>,
    positions: Vec<Vec3>,
    normals: Option<Vec<Vec3>>,
    uvs: Option<Vec<Vec2>>,
    local_indices: Option<Vec<u32>>,
) -> (u32, u32) {
    let local_indices = local_indices.unwrap_or_else(|| (0..positions.len() as u32).collect());
    let normals = match normals {
        Some(explicit)
            if explicit.len() == positions.len()
                && explicit.iter().any(|n| n.length_squared() > 0.0) =>
        {
            explicit
        }
        _ => smooth_normals(&positions, &local_indices),
    };
    let mut uvs = uvs.unwrap_or_default();
    uvs.resize(positions.len(), Vec2::ZERO);

    let base_vertex = vertices.len() as u32;
    for (i, position) in positions.iter().enumerate() {
        vertices.push(MeshVertex::new(*position, normals[i].normalize_or_zero(), uvs[i]));
    }
    let index_offset = indices.len() as u32;
    indices.extend(local_indices.into_iter().map(|index| index + base_vertex));
    (index_offset, indices.len() as u32 - index_offset)
}

fn collect_textures(
    document: &gltf::Document,
    images: &[gltf::image::Data],
    path: &Path,
) -> Result<Vec<ImportedTexture>> {
    document
        .textures()
        .map(|texture| {
            let source = texture.source().index();
            let image = images
                .get(source)
                .ok_or_else(|| anyhow!("Image index {source} missing in {}", path.display()))?;
            Ok(ImportedTexture {
                label: texture
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("texture_{}", texture.index())),
                width: image.width,
                height: image.height,
                data: expand_to_rgba(image)?,
            })
        })
        .collect()
}

fn collect_materials(document: &gltf::Document) -> Vec<ImportedMaterial> {
    document
        .materials()
        .enumerate()
        .map(|(index, material)| {
            let pbr = material.pbr_metallic_roughness();
            ImportedMaterial {
                label: material
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("material_{index}")),
                base_color_factor: pbr.base_color_factor(),
                metallic_factor: pbr.metallic_factor(),
                roughness_factor: pbr.roughness_factor(),
                emissive_factor: material.emissive_factor(),
                base_color_texture: pbr.base_color_texture().map(|info| info.texture().index()),
            }
        })
        .collect()
}

fn expand_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    use gltf::image::Format;
    let pixels = &image.pixels;
    let expanded = match image.format {
        Format::R8G8B8A8 => pixels.clone(),
        Format::R8G8B8 => pixels.chunks_exact(3).flat_map(|px| [px[0], px[1], px[2], 255]).collect(),
        Format::R8G8 => pixels.chunks_exact(2).flat_map(|px| [px[0], px[1], 0, 255]).collect(),
        Format::R8 => pixels.iter().flat_map(|&value| [value, value, value, 255]).collect(),
        other => bail!("Unsupported image format {other:?}"),
    };
    Ok(expanded)
}

/// Area-weighted vertex normals for primitives that ship without any.
fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut accumulated = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let (a, b, c) = (triangle[0] as usize, triangle[1] as usize, triangle[2] as usize);
        if a.max(b).max(c) >= positions.len() {
            continue;
        }
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        if face.length_squared() > 0.0 {
            accumulated[a] += face;
            accumulated[b] += face;
            accumulated[c] += face;
        }
    }
    for normal in &mut accumulated {
        *normal = if normal.length_squared() > 0.0 { normal.normalize() } else { Vec3::Y };
    }
    accumulated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_bundled_triangle() {
        let import =
            load_gltf_with_materials("assets/models/triangle.gltf").expect("bundled gltf should load");
        let mesh = &import.mesh;
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.subsets.len(), 1);
        assert_eq!(mesh.subsets[0].index_offset, 0);
        assert_eq!(mesh.subsets[0].index_count, 3);
        assert_eq!(mesh.subsets[0].material, Some(0));
        for vertex in &mesh.vertices {
            let normal = Vec3::from_array(vertex.normal);
            assert!((normal - Vec3::Z).length_squared() < 1e-4);
            let uv = Vec2::from_array(vertex.uv);
            assert!((0.0..=1.0).contains(&uv.x));
            assert!((0.0..=1.0).contains(&uv.y));
        }
        assert_eq!(import.materials.len(), 1);
        assert!(import.materials[0].is_pbr_authored());
        assert!(import.has_pbr_materials());
    }

    #[test]
    fn bounds_enclose_all_vertices() {
        let vertices = vec![
            MeshVertex::new(Vec3::new(-2.0, 0.0, 1.0), Vec3::Y, Vec2::ZERO),
            MeshVertex::new(Vec3::new(4.0, 2.0, -3.0), Vec3::Y, Vec2::ZERO),
            MeshVertex::new(Vec3::new(1.0, -1.0, 0.0), Vec3::Y, Vec2::ZERO),
        ];
        let bounds = MeshBounds::from_vertices(&vertices);
        assert_eq!(bounds.min, Vec3::new(-2.0, -1.0, -3.0));
        assert_eq!(bounds.max, Vec3::new(4.0, 2.0, 1.0));
        assert_eq!(bounds.center, Vec3::new(1.0, 0.5, -1.0));
        let farthest = (Vec3::new(4.0, 2.0, -3.0) - bounds.center).length();
        assert!((bounds.radius - farthest).abs() < 1e-5);
    }

    #[test]
    fn empty_vertex_list_produces_zero_bounds() {
        let bounds = MeshBounds::from_vertices(&[]);
        assert_eq!(bounds.radius, 0.0);
        assert_eq!(bounds.center, Vec3::ZERO);
    }

    #[test]
    fn missing_normals_are_reconstructed_from_faces() {
        // A CCW triangle in the XY plane faces +Z.
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        for normal in smooth_normals(&positions, &[0, 1, 2]) {
            assert!((normal - Vec3::Z).length() < 1e-6);
        }
    }

    #[test]
    fn appended_primitives_share_one_buffer_pair() {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let triangle = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let first = append_primitive(&mut vertices, &mut indices, triangle.clone(), None, None, None);
        let second =
            append_primitive(&mut vertices, &mut indices, triangle, None, None, Some(vec![2, 1, 0]));
        assert_eq!(first, (0, 3));
        assert_eq!(second, (3, 3));
        assert_eq!(indices, vec![0, 1, 2, 5, 4, 3]);
        assert_eq!(vertices.len(), 6);
    }

    #[test]
    fn pbr_detection_keys_on_texture_or_factors() {
        let mut material = ImportedMaterial {
            label: "m".into(),
            base_color_factor: [1.0; 4],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0; 3],
            base_color_texture: None,
        };
        assert!(!material.is_pbr_authored());
        material.metallic_factor = 0.5;
        assert!(material.is_pbr_authored());
        material.metallic_factor = 0.0;
        material.base_color_texture = Some(0);
        assert!(material.is_pbr_authored());
    }
}
