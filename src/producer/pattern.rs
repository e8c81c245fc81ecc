use tracing::debug;

use super::FrameProducer;

/// Number of frames each pattern stays on screen
pub const FRAMES_PER_PATTERN: u32 = 60;

const BAR_COLORS: [u32; 8] = [
    0xFFFF_FFFF, // white
    0xFFFF_FF00, // yellow
    0xFF00_FFFF, // cyan
    0xFF00_FF00, // green
    0xFFFF_00FF, // magenta
    0xFFFF_0000, // red
    0xFF00_00FF, // blue
    0xFF00_0000, // black
];
const SQUARE_SIZE: u32 = 64;

/// The animations cycled through by [`TestPattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Diagonal colour gradient scrolling by four pixels per frame
    Gradient,
    /// Eight vertical colour bars scrolling by eight pixels per frame
    ColorBars,
    /// Black and white 64x64 checkerboard scrolling diagonally
    Checkerboard,
}

impl Pattern {
    /// Pattern shown at `frame`
    pub fn for_frame(frame: u32) -> Pattern {
        match (frame / FRAMES_PER_PATTERN) % 3 {
            0 => Pattern::Gradient,
            1 => Pattern::ColorBars,
            _ => Pattern::Checkerboard,
        }
    }

    /// Draw this pattern as it looks at `frame`
    pub fn draw(self, pixels: &mut [u32], width: u32, height: u32, frame: u32) {
        match self {
            Pattern::Gradient => gradient(pixels, width, height, frame),
            Pattern::ColorBars => color_bars(pixels, width, height, frame),
            Pattern::Checkerboard => checkerboard(pixels, width, height, frame),
        }
    }
}

fn rows(pixels: &mut [u32], width: u32, height: u32) -> impl Iterator<Item = (u32, &mut [u32])> {
    pixels
        .chunks_exact_mut(width.max(1) as usize)
        .take(height as usize)
        .zip(0..)
        .map(|(row, y)| (y, row))
}

fn gradient(pixels: &mut [u32], width: u32, height: u32, frame: u32) {
    let offset = frame.wrapping_mul(4);
    for (y, row) in rows(pixels, width, height) {
        for (x, pixel) in (0u32..).zip(row.iter_mut()) {
            let r = x.wrapping_add(offset) & 0xFF;
            let g = y.wrapping_add(offset) & 0xFF;
            let b = x.wrapping_add(y).wrapping_add(offset) & 0xFF;
            *pixel = 0xFF00_0000 | (r << 16) | (g << 8) | b;
        }
    }
}

fn color_bars(pixels: &mut [u32], width: u32, height: u32, frame: u32) {
    let bar_width = (width / 8).max(1);
    let offset = frame.wrapping_mul(8);
    for (_, row) in rows(pixels, width, height) {
        for (x, pixel) in (0u32..).zip(row.iter_mut()) {
            let bar = (x.wrapping_add(offset) / bar_width) % 8;
            *pixel = BAR_COLORS[bar as usize];
        }
    }
}

fn checkerboard(pixels: &mut [u32], width: u32, height: u32, frame: u32) {
    let offset = frame.wrapping_mul(4);
    for (y, row) in rows(pixels, width, height) {
        let py = y.wrapping_add(offset) / SQUARE_SIZE;
        for (x, pixel) in (0u32..).zip(row.iter_mut()) {
            let px = x.wrapping_add(offset) / SQUARE_SIZE;
            let white = (px + py) & 1 == 1;
            *pixel = if white { 0xFFFF_FFFF } else { 0xFF00_0000 };
        }
    }
}

/// Animated test pattern
///
/// Cycles through [`Pattern::Gradient`], [`Pattern::ColorBars`] and
/// [`Pattern::Checkerboard`], switching every [`FRAMES_PER_PATTERN`] frames.
#[derive(Debug, Default, Clone)]
pub struct TestPattern {
    frame: u32,
}

impl TestPattern {
    /// Start at frame zero
    pub fn new() -> TestPattern {
        TestPattern::default()
    }

    /// Number of frames drawn so far
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Pattern the next frame will show
    pub fn current(&self) -> Pattern {
        Pattern::for_frame(self.frame)
    }
}

impl FrameProducer for TestPattern {
    #[profiling::function]
    fn fill(&mut self, pixels: &mut [u32], width: u32, height: u32) {
        let pattern = self.current();
        if self.frame % FRAMES_PER_PATTERN == 0 {
            debug!(?pattern, frame = self.frame, "Switching test pattern");
        }
        pattern.draw(pixels, width, height, self.frame);
        self.frame = self.frame.wrapping_add(1);
    }
}
