use crate::config::Rgb;

pub const CHANNELS: usize = 3;

/// Packed RGB24 pixel buffer, row-major, no padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// A black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let mut data = Vec::with_capacity(Self::byte_len(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&color);
        }
        Self { width, height, data }
    }

    /// Wrap raw RGB24 bytes; `None` on a size mismatch.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == Self::byte_len(width, height)).then_some(Self { width, height, data })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * CHANNELS
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let o = self.offset(x, y);
        [self.data[o], self.data[o + 1], self.data[o + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: Rgb) {
        let o = self.offset(x, y);
        self.data[o..o + CHANNELS].copy_from_slice(&rgb);
    }

    /// Fill `[x0, x1) x [y0, y1)`, clipped to the frame.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, rgb: Rgb) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        for y in y0.min(y1)..y1 {
            for x in x0.min(x1)..x1 {
                self.set_pixel(x, y, rgb);
            }
        }
    }
}
