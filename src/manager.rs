// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Queue management and the public [Context].

The [Context] is what the image layer talks to.  It records commands into the *current* queue and,
on flush, hands that queue to the render thread; the next enqueue picks up a fresh queue from the
pool, so the game thread never waits for a flush it doesn't need the result of.

A queue goes back to the pool only after it flushed cleanly.  A failed flush poisons the pool:
every later flush returns the same error without touching the backend.
*/

use crate::command::{Command, ReadPixelsCommand, WritePixelsCommand};
use crate::command_queue::{CommandQueue, DrawRequest, VertexLimits};
use crate::config::Config;
use crate::error::{Error, ErrorSlot};
use crate::graphics::{Graphics, Rect, WindowHandle};
use crate::image::{BYTES_PER_PIXEL, Image};
use crate::managed_bytes::ManagedBytes;
use crate::render_thread::{RenderThread, ThreadMode};
use crate::shader::Shader;
use crate::shader_ir::{ShaderIr, SourceHash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Idle queues, plus the error that poisoned them.
pub(crate) struct QueuePool {
    cache: Mutex<Vec<Box<CommandQueue>>>,
    poison: ErrorSlot,
    limits: VertexLimits,
}

impl QueuePool {
    pub(crate) fn new(limits: VertexLimits) -> Self {
        QueuePool {
            cache: Mutex::new(Vec::new()),
            poison: ErrorSlot::new(),
            limits,
        }
    }

    pub(crate) fn get(&self) -> Box<CommandQueue> {
        self.cache
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Box::new(CommandQueue::new(self.limits)))
    }

    pub(crate) fn put(&self, queue: Box<CommandQueue>) {
        debug_assert!(queue.is_empty());
        debug_assert!(queue.error().get().is_none());
        self.cache.lock().unwrap().push(queue);
    }

    pub(crate) fn poison(&self) -> &ErrorSlot {
        &self.poison
    }
}

pub(crate) struct Manager {
    pool: Arc<QueuePool>,
    current: Option<Box<CommandQueue>>,
    vsync: Arc<AtomicBool>,
}

impl Manager {
    pub(crate) fn new(limits: VertexLimits, vsync: Arc<AtomicBool>) -> Self {
        Manager {
            pool: Arc::new(QueuePool::new(limits)),
            current: None,
            vsync,
        }
    }

    fn current(&mut self) -> &mut CommandQueue {
        let pool = &self.pool;
        self.current.get_or_insert_with(|| pool.get())
    }

    pub(crate) fn enqueue(&mut self, command: Command) {
        self.current().push(command);
    }

    pub(crate) fn enqueue_draw_triangles(&mut self, req: &DrawRequest<'_>) -> Result<(), Error> {
        self.current().enqueue_draw_triangles(req)
    }

    /// Dispatches the current queue to the render thread.
    pub(crate) fn flush(&mut self, render: &RenderThread, end_frame: bool) -> Result<(), Error> {
        if let Err(e) = self.pool.poison().check() {
            if let Some(mut queue) = self.current.take() {
                queue.discard();
            }
            return Err(e);
        }
        let mut queue = match self.current.take() {
            Some(queue) => queue,
            None if end_frame => self.pool.get(),
            None => return Ok(()),
        };
        let sync = queue.needs_sync(end_frame, self.vsync.load(Ordering::Relaxed));
        let pool = self.pool.clone();
        let job = move |graphics: &mut dyn Graphics| -> Result<(), Error> {
            let result = queue.flush(graphics, end_frame);
            match &result {
                Ok(()) => pool.put(queue),
                Err(e) => {
                    pool.poison().latch(e.clone());
                    queue.discard();
                }
            }
            result
        };
        if sync {
            render.call(job)?
        } else {
            render.post(Box::new(move |graphics| {
                // surfaced by the next flush through the poisoned pool
                _ = job(graphics);
            }))
        }
    }
}

/// The pipeline's entry point: owns the queues and the render thread.
pub struct Context {
    manager: Mutex<Manager>,
    render: RenderThread,
    vsync: Arc<AtomicBool>,
    screen: Mutex<Option<Image>>,
    max_image_size: usize,
    needs_clearing_screen: bool,
}

impl Context {
    /// Creates the configured backend on a dedicated render thread.
    pub fn new(config: Config) -> Result<Self, Error> {
        let graphics = crate::imp::new_graphics(&config)?;
        Self::with_graphics(graphics, config, ThreadMode::Dedicated)
    }

    /// Uses a caller-supplied backend.  The backend is initialized here.
    pub fn with_graphics(
        graphics: Box<dyn Graphics>,
        config: Config,
        mode: ThreadMode,
    ) -> Result<Self, Error> {
        config.validate()?;
        let render = RenderThread::new(graphics, mode)?;
        let vsync_enabled = config.vsync;
        let transparent = config.transparent;
        let (max_image_size, needs_clearing_screen) = render.call(move |g| {
            g.initialize()?;
            g.set_vsync_enabled(vsync_enabled);
            g.set_transparent(transparent);
            Ok::<_, Error>((g.max_image_size(), g.needs_clearing_screen()))
        })??;
        logwise::info_sync!(
            "context ready, max image size {size}",
            size = max_image_size
        );
        let vsync = Arc::new(AtomicBool::new(config.vsync));
        Ok(Context {
            manager: Mutex::new(Manager::new(VertexLimits::from(&config), vsync.clone())),
            render,
            vsync,
            screen: Mutex::new(None),
            max_image_size,
            needs_clearing_screen,
        })
    }

    pub fn max_image_size(&self) -> usize {
        self.max_image_size
    }

    pub fn needs_clearing_screen(&self) -> bool {
        self.needs_clearing_screen
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), Error> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!(
                "image size {width}x{height} is empty"
            )));
        }
        let max = self.max_image_size;
        if width as usize > max || height as usize > max {
            return Err(Error::InvalidArgument(format!(
                "image size {width}x{height} exceeds {max}"
            )));
        }
        Ok(())
    }

    pub fn new_image(&self, width: u32, height: u32) -> Result<Image, Error> {
        self.check_size(width, height)?;
        let image = Image::new(width, height, false);
        self.manager
            .lock()
            .unwrap()
            .enqueue(Command::NewImage(image.clone()));
        Ok(image)
    }

    /// Creates the image that aliases the swap chain's back buffer.  Replaces any previous one.
    pub fn new_screen_framebuffer_image(&self, width: u32, height: u32) -> Result<Image, Error> {
        self.check_size(width, height)?;
        let image = Image::new(width, height, true);
        self.manager
            .lock()
            .unwrap()
            .enqueue(Command::NewScreenFramebufferImage(image.clone()));
        if let Some(old) = self.screen.lock().unwrap().replace(image.clone()) {
            // the backend releases the old screen when the new one is created
            old.mark_disposed();
        }
        Ok(image)
    }

    pub fn new_shader(&self, ir: Arc<ShaderIr>) -> Shader {
        let shader = Shader::new(ir);
        self.manager
            .lock()
            .unwrap()
            .enqueue(Command::NewShader(shader.clone()));
        shader
    }

    /// Supplies bytecode built offline for shaders whose program text is `source`.
    ///
    /// Takes effect for shaders created afterwards.
    pub fn register_precompiled_shader(
        &self,
        source: &str,
        vertex: &[u8],
        pixel: &[u8],
    ) -> Result<(), Error> {
        let hash = SourceHash::of(source);
        let (vertex, pixel) = (vertex.to_vec(), pixel.to_vec());
        self.render
            .call(move |g| g.register_precompiled_shader(hash, &vertex, &pixel))?
    }

    /// Sends buffered pixel writes ahead of a use of `image`.
    fn resolve(manager: &mut Manager, image: &Image) {
        if !image.has_pending() {
            return;
        }
        let writes = image.take_pending();
        manager.enqueue(Command::WritePixels(WritePixelsCommand {
            dst: image.clone(),
            writes,
        }));
    }

    pub fn draw_triangles(&self, req: &DrawRequest<'_>) -> Result<(), Error> {
        let mut manager = self.manager.lock().unwrap();
        Self::resolve(&mut manager, req.dst);
        for src in req.srcs.iter().flatten() {
            Self::resolve(&mut manager, src);
        }
        manager.enqueue_draw_triangles(req)
    }

    /// Buffers RGBA8 `pixels` for `region`.  They reach the backend before the image's next use.
    pub fn write_pixels(
        &self,
        image: &Image,
        region: Rect,
        pixels: impl Into<ManagedBytes>,
    ) -> Result<(), Error> {
        image.buffer_write(region, pixels.into())
    }

    /// Reads RGBA8 pixels back.  Blocks until the render thread has copied them out.
    pub fn read_pixels(&self, image: &Image, regions: &[Rect]) -> Result<Vec<Vec<u8>>, Error> {
        image.ensure_live()?;
        if image.is_screen() {
            return Err(Error::InvalidArgument(
                "pixels cannot be read from the screen".to_string(),
            ));
        }
        if let Some(r) = regions
            .iter()
            .find(|r| r.is_empty() || !image.bounds().contains(r))
        {
            return Err(Error::InvalidArgument(format!(
                "read region {r} is outside {}x{}",
                image.width(),
                image.height()
            )));
        }
        let result = Arc::new(Mutex::new(Vec::new()));
        {
            let mut manager = self.manager.lock().unwrap();
            Self::resolve(&mut manager, image);
            manager.enqueue(Command::ReadPixels(ReadPixelsCommand {
                src: image.clone(),
                regions: regions.to_vec(),
                result: result.clone(),
            }));
        }
        self.flush_commands(false)?;
        let pixels = std::mem::take(&mut *result.lock().unwrap());
        Ok(pixels)
    }

    pub fn dispose_image(&self, image: &Image) {
        if !image.mark_disposed() {
            return;
        }
        drop(image.take_pending());
        self.manager
            .lock()
            .unwrap()
            .enqueue(Command::DisposeImage(image.clone()));
    }

    pub fn dispose_shader(&self, shader: &Shader) {
        if !shader.mark_disposed() {
            return;
        }
        self.manager
            .lock()
            .unwrap()
            .enqueue(Command::DisposeShader(shader.clone()));
    }

    /// Submits everything enqueued so far.  `end_frame` presents and retires the frame.
    pub fn flush_commands(&self, end_frame: bool) -> Result<(), Error> {
        self.manager.lock().unwrap().flush(&self.render, end_frame)
    }

    pub fn set_vsync_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.vsync.store(enabled, Ordering::Relaxed);
        self.render.call(move |g| g.set_vsync_enabled(enabled))
    }

    pub fn set_transparent(&self, transparent: bool) -> Result<(), Error> {
        self.render.call(move |g| g.set_transparent(transparent))
    }

    pub fn set_window(&self, window: WindowHandle) -> Result<(), Error> {
        self.render.call(move |g| g.set_window(window))
    }

    /// Encodes `region` of `image` (the whole image when `None`) as PNG.
    ///
    /// With `blackbg`, every pixel is made opaque.
    pub fn dump_png(
        &self,
        image: &Image,
        blackbg: bool,
        region: Option<Rect>,
    ) -> Result<Vec<u8>, Error> {
        let region = region.unwrap_or_else(|| image.bounds());
        let mut pixels = self
            .read_pixels(image, &[region])?
            .pop()
            .unwrap_or_default();
        if blackbg {
            for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
                px[3] = 0xff;
            }
        }
        let mut out = Vec::new();
        {
            let mut encoder =
                png::Encoder::new(&mut out, region.width() as u32, region.height() as u32);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // pending work is submitted before the render thread is joined
        if let Ok(manager) = self.manager.get_mut()
            && manager.current.as_ref().is_some_and(|q| !q.is_empty())
            && let Err(e) = manager.flush(&self.render, false)
        {
            logwise::warn_sync!(
                "flush during shutdown failed: {err}",
                err = logwise::privacy::LogIt(&e)
            );
        }
    }
}
