//! Presentation sinks
//!
//! The core only uploads raw RGBA frames and asks for them to be shown. The
//! accelerated path is host-specific; [`SoftwareFramebuffer`] is the fallback
//! that always works.

use std::fmt::Display;
use std::io::Cursor;

use tracing::{debug, warn};

/// Screen width of produced frames in pixels
pub const SCREEN_WIDTH: usize = 160;
/// Screen height of produced frames in pixels
pub const SCREEN_HEIGHT: usize = 144;
/// Bytes per RGBA frame
pub const FRAME_BYTES: usize = SCREEN_WIDTH * SCREEN_HEIGHT * 4;
/// Thumbnail size stored next to persistent RAM (half resolution)
pub const THUMBNAIL_WIDTH: u32 = (SCREEN_WIDTH / 2) as u32;
pub const THUMBNAIL_HEIGHT: u32 = (SCREEN_HEIGHT / 2) as u32;

/// Receives pixel buffers and displays them.
pub trait PresentationSink {
    /// Copy a complete RGBA frame
    fn upload(&mut self, pixels: &[u8]);

    /// Show the most recently uploaded frame
    fn present(&mut self);
}

impl<P: PresentationSink + ?Sized> PresentationSink for Box<P> {
    fn upload(&mut self, pixels: &[u8]) {
        (**self).upload(pixels);
    }

    fn present(&mut self) {
        (**self).present();
    }
}

/// CPU-side framebuffer.
#[derive(Debug, Clone)]
pub struct SoftwareFramebuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    uploads: u64,
    presents: u64,
}

impl SoftwareFramebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height * 4],
            uploads: 0,
            presents: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// RGBA pixels of the last uploaded frame
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl Default for SoftwareFramebuffer {
    fn default() -> Self {
        Self::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

impl PresentationSink for SoftwareFramebuffer {
    fn upload(&mut self, pixels: &[u8]) {
        if pixels.len() != self.pixels.len() {
            debug!(
                "Frame size mismatch: got {} bytes, expected {}",
                pixels.len(),
                self.pixels.len()
            );
        }
        let len = pixels.len().min(self.pixels.len());
        self.pixels[..len].copy_from_slice(&pixels[..len]);
        self.uploads += 1;
    }

    fn present(&mut self) {
        self.presents += 1;
    }
}

/// Use the accelerated sink if it could be created, otherwise the fallback.
pub fn select_sink<A, E, B>(accelerated: Result<A, E>, fallback: impl FnOnce() -> B) -> Box<dyn PresentationSink>
where
    A: PresentationSink + 'static,
    B: PresentationSink + 'static,
    E: Display,
{
    match accelerated {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("Accelerated presentation unavailable, using software fallback: {}", e);
            Box::new(fallback())
        }
    }
}

/// Encode a half-resolution PNG of a full RGBA frame.
///
/// Returns `None` if `pixels` is not exactly one frame or encoding fails.
pub fn thumbnail_png(pixels: &[u8]) -> Option<Vec<u8>> {
    if pixels.len() != FRAME_BYTES {
        return None;
    }
    let frame =
        image::RgbaImage::from_raw(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, pixels.to_vec())?;
    let small = image::imageops::thumbnail(&frame, THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);

    let mut out = Cursor::new(Vec::new());
    match small.write_to(&mut out, image::ImageFormat::Png) {
        Ok(()) => Some(out.into_inner()),
        Err(e) => {
            warn!("Thumbnail encoding failed: {}", e);
            None
        }
    }
}
