/// A single video frame with pixel data and sequence index.
///
/// Data is stored as contiguous RGB bytes in row-major order.
/// The domain layer treats pixel data as opaque — format conversion
/// happens at I/O boundaries only.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * 3,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            index,
        }
    }

    /// A frame filled with a single RGB color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: usize) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 3);
        for _ in 0..(width as usize) * (height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// RGB triple at `(x, y)`. Caller must stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 3;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// Nearest-neighbor resize to `(width, height)`, preserving the index.
    ///
    /// Returns a clone when the target equals the current size.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }

        let sx = self.width as f64 / width as f64;
        let sy = self.height as f64 / height as f64;
        let mut data = vec![0u8; (width as usize) * (height as usize) * 3];

        for y in 0..height as usize {
            let src_y = ((y as f64 * sy) as usize).min(self.height as usize - 1);
            for x in 0..width as usize {
                let src_x = ((x as f64 * sx) as usize).min(self.width as usize - 1);
                let src = (src_y * self.width as usize + src_x) * 3;
                let dst = (y * width as usize + x) * 3;
                data[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
            }
        }

        Frame::new(data, width, height, self.index)
    }
}
