use anyhow::Result;
use shrike_inspector::tools::{
    PointerSample, Tool, ToolContext, ToolDescriptor, ToolExport, ToolHandle,
    TOOL_PLUGIN_API_VERSION,
};

/// Bucket fill: replaces the 4-connected region under the fill point with the
/// brush color.
#[derive(Default)]
struct FloodFillTool;

impl FloodFillTool {
    fn pixel_at(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y as usize) * (width as usize) + x as usize) * 4;
        [pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3]]
    }

    fn write_pixel(pixels: &mut [u8], width: u32, x: u32, y: u32, color: [u8; 4]) {
        let idx = ((y as usize) * (width as usize) + x as usize) * 4;
        pixels[idx..idx + 4].copy_from_slice(&color);
    }
}

impl Tool for FloodFillTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor { name: "flood_fill".to_string(), icon: "F".to_string() }
    }

    fn fill(&mut self, ctx: &mut ToolContext<'_>, x: u32, y: u32) -> Result<()> {
        let (width, height) = (ctx.width(), ctx.height());
        if x >= width || y >= height {
            return Ok(());
        }
        let replacement = ctx.metadata().color;
        let target = {
            let pixels = ctx.pixels();
            Self::pixel_at(pixels, width, x, y)
        };
        if target == replacement {
            return Ok(());
        }

        let pixels = ctx.pixels_mut();
        let mut stack = vec![(x, y)];
        while let Some((cx, cy)) = stack.pop() {
            if Self::pixel_at(pixels, width, cx, cy) != target {
                continue;
            }
            Self::write_pixel(pixels, width, cx, cy, replacement);
            if cx > 0 {
                stack.push((cx - 1, cy));
            }
            if cx + 1 < width {
                stack.push((cx + 1, cy));
            }
            if cy > 0 {
                stack.push((cx, cy - 1));
            }
            if cy + 1 < height {
                stack.push((cx, cy + 1));
            }
        }
        ctx.request_update();
        Ok(())
    }

    fn pointer(&mut self, _ctx: &mut ToolContext<'_>, _sample: PointerSample) -> Result<()> {
        Ok(())
    }
}

unsafe extern "C" fn create_tool() -> ToolHandle {
    let tool: Box<dyn Tool> = Box::new(FloodFillTool::default());
    ToolHandle::from_box(tool)
}

#[no_mangle]
pub extern "C" fn shrike_tool_entry() -> ToolExport {
    ToolExport { api_version: TOOL_PLUGIN_API_VERSION, create: create_tool }
}
