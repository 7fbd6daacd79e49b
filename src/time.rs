use std::time::Instant;

const SMOOTHING: f32 = 0.9;

/// Frame clock. `tick` runs once per frame; the smoothed delta feeds the FPS
/// readout so it does not flicker with scheduler noise.
pub struct Time {
    last: Instant,
    frames: u64,
    smoothed_delta: f32,
}

impl Time {
    pub fn new() -> Self {
        Self { last: Instant::now(), frames: 0, smoothed_delta: 1.0 / 60.0 }
    }

    /// Advances the clock and returns the seconds elapsed since the previous
    /// tick.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        self.frames += 1;
        self.smoothed_delta += (dt - self.smoothed_delta) * (1.0 - SMOOTHING);
        dt
    }

    pub fn frame_index(&self) -> u64 {
        self.frames
    }

    pub fn smoothed_fps(&self) -> f32 {
        if self.smoothed_delta <= f32::EPSILON {
            0.0
        } else {
            1.0 / self.smoothed_delta
        }
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}
