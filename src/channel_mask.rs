use bitflags::bitflags;

bitflags! {
    /// Which channels of an RGBA texture survive extraction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::all()
    }
}

impl ChannelMask {
    pub fn is_alpha_only(self) -> bool {
        self == ChannelMask::A
    }

    pub fn label(self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let mut out = String::new();
        for (flag, ch) in [
            (ChannelMask::R, 'R'),
            (ChannelMask::G, 'G'),
            (ChannelMask::B, 'B'),
            (ChannelMask::A, 'A'),
        ] {
            if self.contains(flag) {
                out.push(ch);
            }
        }
        out
    }
}

const COLOR_FLAGS: [ChannelMask; 3] = [ChannelMask::R, ChannelMask::G, ChannelMask::B];

/// Bytes needed for a tightly packed RGBA8 buffer of the given size.
pub fn pixel_buffer_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Rewrites deselected channels in place. Pixels are 4-byte RGBA.
///
/// An alpha-only mask projects alpha into the color channels and forces the
/// result opaque. Otherwise each deselected color channel borrows the value
/// of the single selected neighbor when exactly one exists and goes to zero
/// when zero or both neighbors are selected; deselecting alpha forces 255.
pub fn remap_pixels(pixels: &mut [u8], mask: ChannelMask) {
    if mask == ChannelMask::all() {
        return;
    }
    if mask.is_alpha_only() {
        for px in pixels.chunks_exact_mut(4) {
            let alpha = px[3];
            px[0] = alpha;
            px[1] = alpha;
            px[2] = alpha;
            px[3] = u8::MAX;
        }
        return;
    }
    for px in pixels.chunks_exact_mut(4) {
        let original = [px[0], px[1], px[2]];
        for channel in 0..3 {
            if !mask.contains(COLOR_FLAGS[channel]) {
                px[channel] = donor_value(&original, mask, channel);
            }
        }
        if !mask.contains(ChannelMask::A) {
            px[3] = u8::MAX;
        }
    }
}

fn donor_value(original: &[u8; 3], mask: ChannelMask, channel: usize) -> u8 {
    let mut donor = None;
    for other in 0..3 {
        if other == channel || !mask.contains(COLOR_FLAGS[other]) {
            continue;
        }
        if donor.is_some() {
            // Two live neighbors means no unambiguous source.
            return 0;
        }
        donor = Some(original[other]);
    }
    donor.unwrap_or(0)
}

/// Reverses row order in place for textures authored with a flipped Y origin.
pub fn flip_rows(pixels: &mut [u8], width: u32, height: u32) {
    let stride = width as usize * 4;
    if stride == 0 || height < 2 {
        return;
    }
    let mut top = 0usize;
    let mut bottom = height as usize - 1;
    while top < bottom {
        let (head, tail) = pixels.split_at_mut(bottom * stride);
        head[top * stride..(top + 1) * stride].swap_with_slice(&mut tail[..stride]);
        top += 1;
        bottom -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pixels() -> Vec<u8> {
        vec![
            10, 20, 30, 40, //
            50, 60, 70, 80, //
            90, 100, 110, 120, //
            130, 140, 150, 160,
        ]
    }

    #[test]
    fn default_mask_keeps_pixels_untouched() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::default());
        assert_eq!(px, sample_pixels());
    }

    #[test]
    fn alpha_only_mask_projects_alpha_to_gray() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::A);
        for (chunk, src) in px.chunks_exact(4).zip(sample_pixels().chunks_exact(4)) {
            assert_eq!(chunk[0], src[3]);
            assert_eq!(chunk[1], src[3]);
            assert_eq!(chunk[2], src[3]);
            assert_eq!(chunk[3], u8::MAX);
        }
    }

    #[test]
    fn deselected_alpha_forces_opaque() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::R | ChannelMask::G | ChannelMask::B);
        for chunk in px.chunks_exact(4) {
            assert_eq!(chunk[3], u8::MAX);
        }
    }

    #[test]
    fn single_color_mask_copies_into_missing_channels() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::R);
        for (chunk, src) in px.chunks_exact(4).zip(sample_pixels().chunks_exact(4)) {
            assert_eq!(chunk[0], src[0]);
            assert_eq!(chunk[1], src[0]);
            assert_eq!(chunk[2], src[0]);
            assert_eq!(chunk[3], u8::MAX);
        }
    }

    #[test]
    fn two_color_mask_zeroes_the_remaining_channel() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::G | ChannelMask::B);
        for (chunk, src) in px.chunks_exact(4).zip(sample_pixels().chunks_exact(4)) {
            assert_eq!(chunk[0], 0);
            assert_eq!(chunk[1], src[1]);
            assert_eq!(chunk[2], src[2]);
            assert_eq!(chunk[3], u8::MAX);
        }
    }

    #[test]
    fn empty_mask_yields_opaque_black() {
        let mut px = sample_pixels();
        remap_pixels(&mut px, ChannelMask::empty());
        for chunk in px.chunks_exact(4) {
            assert_eq!(chunk, [0, 0, 0, u8::MAX]);
        }
    }

    #[test]
    fn buffer_len_matches_dimensions() {
        assert_eq!(pixel_buffer_len(0, 7), 0);
        assert_eq!(pixel_buffer_len(3, 2), 24);
        assert_eq!(pixel_buffer_len(640, 480), 640 * 480 * 4);
    }

    #[test]
    fn flip_rows_reverses_row_order() {
        // 2x3 texture, one marker byte per row.
        let mut px = vec![
            1, 1, 1, 1, 1, 1, 1, 1, //
            2, 2, 2, 2, 2, 2, 2, 2, //
            3, 3, 3, 3, 3, 3, 3, 3,
        ];
        flip_rows(&mut px, 2, 3);
        assert_eq!(&px[0..8], &[3; 8]);
        assert_eq!(&px[8..16], &[2; 8]);
        assert_eq!(&px[16..24], &[1; 8]);
    }

    #[test]
    fn flip_rows_is_involutive() {
        let mut px: Vec<u8> = (0..4 * 5 * 4).map(|i| (i % 251) as u8).collect();
        let original = px.clone();
        flip_rows(&mut px, 4, 5);
        assert_ne!(px, original);
        flip_rows(&mut px, 4, 5);
        assert_eq!(px, original);
    }

    #[test]
    fn mask_labels_name_selected_channels() {
        assert_eq!(ChannelMask::all().label(), "RGBA");
        assert_eq!((ChannelMask::R | ChannelMask::B).label(), "RB");
        assert_eq!(ChannelMask::empty().label(), "none");
    }
}
