use image::RgbImage;

/// Per-frame metadata submitted alongside the model input.
///
/// Post-processors use the original frame size to map normalized model
/// coordinates back onto the frame the consumer will display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
}

impl FrameInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Anything that knows the pixel size of the frame it describes.
pub trait FrameSize {
    /// `(width, height)` in pixels
    fn frame_size(&self) -> (u32, u32);
}

impl FrameSize for FrameInfo {
    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSize for (u32, u32) {
    fn frame_size(&self) -> (u32, u32) {
        *self
    }
}

/// Lets the frame itself travel as metadata, so the consumer can draw on it
/// once its result is released.
impl FrameSize for RgbImage {
    fn frame_size(&self) -> (u32, u32) {
        self.dimensions()
    }
}
