// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Game-side image handles.

An [Image] is created on the game thread and its backend counterpart is created later, when the
queued `NewImage` command runs on the render thread.  The handle learns its [ImageId] at that
point; every later command that refers to the image runs after it, in queue order.

Pixel writes are buffered on the handle and resolved into a single `WritePixels` command before
the image is next drawn with, read, or disposed.
*/

use crate::bittricks::internal_image_size;
use crate::error::Error;
use crate::graphics::{ImageId, Rect};
use crate::managed_bytes::ManagedBytes;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// One buffered write, not yet sent to the backend.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) region: Rect,
    pub(crate) pixels: ManagedBytes,
}

struct ImageInner {
    width: u32,
    height: u32,
    screen: bool,
    driver: OnceLock<ImageId>,
    pending: Mutex<Vec<PendingWrite>>,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct Image(Arc<ImageInner>);

impl Image {
    pub(crate) fn new(width: u32, height: u32, screen: bool) -> Self {
        Image(Arc::new(ImageInner {
            width,
            height,
            screen,
            driver: OnceLock::new(),
            pending: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn is_screen(&self) -> bool {
        self.0.screen
    }

    /// Allocation size.  The screen is allocated at exactly its logical size.
    pub fn internal_size(&self) -> (u32, u32) {
        if self.0.screen {
            (self.0.width, self.0.height)
        } else {
            (
                internal_image_size(self.0.width),
                internal_image_size(self.0.height),
            )
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::sized(self.0.width, self.0.height)
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::Acquire)
    }

    /// Whether both handles name the same image.
    pub fn same(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_driver_id(&self, id: ImageId) {
        if self.0.driver.set(id).is_err() {
            logwise::warn_sync!(
                "image already has a backend id; ignoring {id}",
                id = id.to_string()
            );
        }
    }

    /// The backend id.  Only valid on the render thread, after the image's creation command ran.
    pub(crate) fn driver_id(&self) -> Result<ImageId, Error> {
        self.0.driver.get().copied().ok_or_else(|| {
            Error::InvalidArgument("image used before its creation command ran".to_string())
        })
    }

    /// Marks the handle disposed.  Returns `false` if it already was.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.0.disposed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::InvalidArgument("image is disposed".to_string()));
        }
        Ok(())
    }

    /// Validates and buffers one write.
    pub(crate) fn buffer_write(&self, region: Rect, pixels: ManagedBytes) -> Result<(), Error> {
        self.ensure_live()?;
        if self.0.screen {
            return Err(Error::InvalidArgument(
                "pixels cannot be written to the screen".to_string(),
            ));
        }
        if region.is_empty() || !self.bounds().contains(&region) {
            return Err(Error::InvalidArgument(format!(
                "write region {region} is outside {}x{}",
                self.0.width, self.0.height
            )));
        }
        let expected = region.width() as usize * region.height() as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "write of {region} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        let mut pending = self.0.pending.lock().unwrap();
        if cfg!(debug_assertions) && pending.iter().any(|w| w.region.overlaps(&region)) {
            return Err(Error::InvalidArgument(format!(
                "write region {region} overlaps a buffered write"
            )));
        }
        pending.push(PendingWrite { region, pixels });
        Ok(())
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingWrite> {
        std::mem::take(&mut *self.0.pending.lock().unwrap())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.0.pending.lock().unwrap().is_empty()
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("screen", &self.0.screen)
            .field("driver", &self.0.driver.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_size() {
        assert_eq!(Image::new(4, 300, false).internal_size(), (16, 512));
        assert_eq!(Image::new(640, 480, true).internal_size(), (640, 480));
    }

    #[test]
    fn identity() {
        let a = Image::new(1, 1, false);
        let b = a.clone();
        assert!(a.same(&b));
        assert!(!a.same(&Image::new(1, 1, false)));
    }

    #[test]
    fn write_validation() {
        let img = Image::new(4, 4, false);
        assert!(img.buffer_write(Rect::new(0, 0, 2, 2), vec![0; 16].into()).is_ok());
        assert!(matches!(
            img.buffer_write(Rect::new(0, 0, 2, 2), vec![0; 15].into()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(img.buffer_write(Rect::new(3, 3, 5, 5), vec![0; 16].into()).is_err());
        #[cfg(debug_assertions)]
        assert!(img.buffer_write(Rect::new(1, 1, 3, 3), vec![0; 16].into()).is_err());
        assert!(img.buffer_write(Rect::new(2, 2, 4, 4), vec![0; 16].into()).is_ok());
        assert_eq!(img.take_pending().len(), 2);
        assert!(!img.has_pending());

        let screen = Image::new(4, 4, true);
        assert!(screen.buffer_write(Rect::new(0, 0, 1, 1), vec![0; 4].into()).is_err());
    }
}
