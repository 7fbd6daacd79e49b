use anyhow::{anyhow, Context, Result};
use std::num::NonZeroU64;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use super::{LightingMode, SceneLightingState, DEPTH_FORMAT};
use crate::camera3d::Camera3D;
use crate::mesh::{MeshImport, MeshVertex};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MeshFrameData {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub light_dir: [f32; 4],
    pub light_color: [f32; 4],
    pub ambient_color: [f32; 4],
    // x: lighting mode (0 basic, 1 environment), y: intensity, z: radiance mip count
    pub lighting_params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MeshDrawData {
    pub model: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    // x: metallic, y: roughness, z: base texture present
    pub material_params: [f32; 4],
}

pub(super) struct MeshPipelineResources {
    pub pipeline: wgpu::RenderPipeline,
    pub frame_draw_bgl: Arc<wgpu::BindGroupLayout>,
    pub material_bgl: Arc<wgpu::BindGroupLayout>,
    pub environment_bgl: Arc<wgpu::BindGroupLayout>,
    pub material_sampler: wgpu::Sampler,
    pub format: wgpu::TextureFormat,
}

#[derive(Default)]
pub(super) struct MeshPass {
    resources: Option<MeshPipelineResources>,
    frame_buffer: Option<wgpu::Buffer>,
    draw_buffer: Option<wgpu::Buffer>,
    draw_capacity: usize,
    draw_stride: u64,
    frame_draw_bind_group: Option<wgpu::BindGroup>,
    environment_bind_group: Option<wgpu::BindGroup>,
    environment_key: usize,
}

struct SubsetGpu {
    index_offset: u32,
    index_count: u32,
    draw_data: MeshDrawData,
    material_bind_group: Arc<wgpu::BindGroup>,
}

/// GPU-resident copy of one imported asset.
pub struct SceneGpu {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    subsets: Vec<SubsetGpu>,
}

impl SceneGpu {
    pub(super) fn from_import(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        resources: &MeshPipelineResources,
        import: &MeshImport,
    ) -> Result<Self> {
        let mesh = &import.mesh;
        if mesh.vertices.is_empty() {
            return Err(anyhow!("Cannot upload a scene without vertices"));
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene VB"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene IB"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let fallback_bind_group = Arc::new(create_material_bind_group(
            device,
            queue,
            resources,
            "fallback_base_color",
            1,
            1,
            &[255, 255, 255, 255],
        ));
        let texture_bind_groups: Vec<Arc<wgpu::BindGroup>> = import
            .textures
            .iter()
            .map(|texture| {
                Arc::new(create_material_bind_group(
                    device,
                    queue,
                    resources,
                    &texture.label,
                    texture.width,
                    texture.height,
                    &texture.data,
                ))
            })
            .collect();

        let mut subsets = Vec::with_capacity(mesh.subsets.len());
        for subset in &mesh.subsets {
            let material = subset.material.and_then(|index| import.materials.get(index));
            let (base_color, emissive, metallic, roughness, texture_index) = match material {
                Some(mat) => (
                    mat.base_color_factor,
                    [mat.emissive_factor[0], mat.emissive_factor[1], mat.emissive_factor[2], 0.0],
                    mat.metallic_factor,
                    mat.roughness_factor,
                    mat.base_color_texture,
                ),
                None => ([1.0, 1.0, 1.0, 1.0], [0.0; 4], 0.0, 1.0, None),
            };
            let material_bind_group = texture_index
                .and_then(|index| texture_bind_groups.get(index).cloned())
                .unwrap_or_else(|| fallback_bind_group.clone());
            let has_texture = if texture_index.is_some() { 1.0 } else { 0.0 };
            subsets.push(SubsetGpu {
                index_offset: subset.index_offset,
                index_count: subset.index_count,
                draw_data: MeshDrawData {
                    model: glam::Mat4::IDENTITY.to_cols_array_2d(),
                    base_color,
                    emissive,
                    material_params: [metallic, roughness, has_texture, 0.0],
                },
                material_bind_group,
            });
        }

        Ok(Self { vertex_buffer, index_buffer, subsets })
    }

    pub fn subset_count(&self) -> usize {
        self.subsets.len()
    }
}

impl MeshPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_resources(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<()> {
        if let Some(resources) = self.resources.as_ref() {
            if resources.format == format {
                return Ok(());
            }
        }
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Preview Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/mesh_preview.wgsl").into()),
        });

        let frame_draw_bgl = Arc::new(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Frame BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(std::mem::size_of::<MeshDrawData>() as u64),
                    },
                    count: None,
                },
            ],
        }));

        let material_bgl = Arc::new(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        }));

        let environment_bgl = Arc::new(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Environment BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        }));

        let material_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mesh Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&frame_draw_bgl, &material_bgl, &environment_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Preview Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Inspected assets are often open or single-sided.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        self.resources = Some(MeshPipelineResources {
            pipeline,
            frame_draw_bgl,
            material_bgl,
            environment_bgl,
            material_sampler,
            format,
        });
        self.frame_draw_bind_group = None;
        self.environment_bind_group = None;
        self.environment_key = 0;
        Ok(())
    }

    pub fn resources(&self) -> Result<&MeshPipelineResources> {
        self.resources.as_ref().context("Mesh pipeline not initialized")
    }

    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera3D,
        viewport: PhysicalSize<u32>,
        lighting: &SceneLightingState,
        scene: &SceneGpu,
    ) -> Result<()> {
        let draw_size = std::mem::size_of::<MeshDrawData>() as u64;
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        self.draw_stride = (draw_size + alignment - 1) / alignment * alignment;

        if self.frame_buffer.is_none() {
            self.frame_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Mesh Frame Buffer"),
                size: std::mem::size_of::<MeshFrameData>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.frame_draw_bind_group = None;
        }

        let needed = scene.subsets.len().max(1);
        if self.draw_buffer.is_none() || self.draw_capacity < needed {
            self.draw_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Mesh Draw Buffer"),
                size: self.draw_stride * needed as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.draw_capacity = needed;
            self.frame_draw_bind_group = None;
        }

        let mode = match lighting.mode {
            LightingMode::Basic => 0.0,
            LightingMode::Environment => 1.0,
        };
        let frame_data = MeshFrameData {
            view_proj: camera.view_projection(viewport).to_cols_array_2d(),
            view: camera.view_matrix().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            light_dir: lighting.light_direction.normalize_or_zero().extend(0.0).to_array(),
            light_color: lighting.light_color.extend(1.0).to_array(),
            ambient_color: lighting.ambient_color.extend(1.0).to_array(),
            lighting_params: [
                mode,
                lighting.intensity,
                lighting.environment.radiance_mip_count() as f32,
                0.0,
            ],
        };
        let frame_buffer = self.frame_buffer.as_ref().context("Frame buffer missing")?;
        queue.write_buffer(frame_buffer, 0, bytemuck::bytes_of(&frame_data));

        let draw_buffer = self.draw_buffer.as_ref().context("Draw buffer missing")?;
        for (index, subset) in scene.subsets.iter().enumerate() {
            queue.write_buffer(
                draw_buffer,
                index as u64 * self.draw_stride,
                bytemuck::bytes_of(&subset.draw_data),
            );
        }

        if self.frame_draw_bind_group.is_none() {
            let resources = self.resources()?;
            self.frame_draw_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mesh Frame BG"),
                layout: &resources.frame_draw_bgl,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: frame_buffer.as_entire_binding() },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: draw_buffer,
                            offset: 0,
                            size: NonZeroU64::new(draw_size),
                        }),
                    },
                ],
            }));
        }

        let env_key = Arc::as_ptr(&lighting.environment) as usize;
        if self.environment_bind_group.is_none() || self.environment_key != env_key {
            let resources = self.resources()?;
            let env = lighting.environment.as_ref();
            self.environment_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mesh Environment BG"),
                layout: &resources.environment_bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(env.irradiance_view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(env.radiance_view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(env.sampler()),
                    },
                ],
            }));
            self.environment_key = env_key;
        }
        Ok(())
    }

    pub fn record(&self, pass: &mut wgpu::RenderPass<'_>, scene: &SceneGpu) -> Result<()> {
        let resources = self.resources()?;
        let frame_bg = self.frame_draw_bind_group.as_ref().context("Frame bind group missing")?;
        let env_bg = self.environment_bind_group.as_ref().context("Environment bind group missing")?;

        pass.set_pipeline(&resources.pipeline);
        pass.set_vertex_buffer(0, scene.vertex_buffer.slice(..));
        pass.set_index_buffer(scene.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.set_bind_group(2, env_bg, &[]);
        for (index, subset) in scene.subsets.iter().enumerate() {
            let offset = (index as u64 * self.draw_stride) as u32;
            pass.set_bind_group(0, frame_bg, &[offset]);
            pass.set_bind_group(1, subset.material_bind_group.as_ref(), &[]);
            pass.draw_indexed(
                subset.index_offset..subset.index_offset + subset.index_count,
                0,
                0..1,
            );
        }
        Ok(())
    }
}

fn create_material_bind_group(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    resources: &MeshPipelineResources,
    label: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> wgpu::BindGroup {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Material BG"),
        layout: &resources.material_bgl,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&resources.material_sampler),
            },
        ],
    })
}
