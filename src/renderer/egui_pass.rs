use anyhow::Result;
use egui_wgpu::{Renderer as EguiRenderer, ScreenDescriptor};

use super::SurfaceFrame;

/// Paints egui over an already-rendered frame.
pub fn render(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    painter: &mut EguiRenderer,
    paint_jobs: &[egui::ClippedPrimitive],
    screen: &ScreenDescriptor,
    frame: SurfaceFrame,
) -> Result<()> {
    render_with_load(device, queue, painter, paint_jobs, screen, frame, wgpu::LoadOp::Load)
}

/// Paints egui onto a cleared frame. Used by the popup window, which has no
/// 3D pass underneath.
pub fn render_cleared(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    painter: &mut EguiRenderer,
    paint_jobs: &[egui::ClippedPrimitive],
    screen: &ScreenDescriptor,
    frame: SurfaceFrame,
    clear: wgpu::Color,
) -> Result<()> {
    render_with_load(device, queue, painter, paint_jobs, screen, frame, wgpu::LoadOp::Clear(clear))
}

fn render_with_load(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    painter: &mut EguiRenderer,
    paint_jobs: &[egui::ClippedPrimitive],
    screen: &ScreenDescriptor,
    frame: SurfaceFrame,
    load: wgpu::LoadOp<wgpu::Color>,
) -> Result<()> {
    let mut encoder =
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Egui Encoder") });
    let mut commands = painter.update_buffers(device, queue, &mut encoder, paint_jobs, screen);

    let mut pass = encoder
        .begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Egui Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.view(),
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        })
        .forget_lifetime();
    painter.render(&mut pass, paint_jobs, screen);
    drop(pass);

    commands.push(encoder.finish());
    queue.submit(commands);
    frame.present();
    Ok(())
}
