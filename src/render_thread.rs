// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The render thread.

The backend is owned by exactly one thread, and every call into it is a job posted here.  Jobs
run in the order they are posted.  A synchronous call parks the caller until its job has run.

On targets without a dedicated render thread, jobs run inline on the posting thread under a
lock; the ordering contract is the same.
*/

use crate::error::Error;
use crate::graphics::Graphics;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

pub(crate) type Job = Box<dyn FnOnce(&mut dyn Graphics) + Send>;

/// Where backend calls execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadMode {
    /// A dedicated thread owns the backend.
    #[default]
    Dedicated,
    /// Jobs run on the caller's thread.
    Inline,
}

enum Imp {
    Dedicated {
        sender: Option<Sender<Job>>,
        thread: Option<JoinHandle<()>>,
    },
    Inline(Mutex<Box<dyn Graphics>>),
}

pub(crate) struct RenderThread {
    imp: Imp,
}

fn thread_gone() -> Error {
    Error::Backend {
        code: 0,
        message: "render thread has exited".to_string(),
    }
}

impl RenderThread {
    pub(crate) fn new(graphics: Box<dyn Graphics>, mode: ThreadMode) -> Result<Self, Error> {
        match mode {
            ThreadMode::Inline => Ok(RenderThread {
                imp: Imp::Inline(Mutex::new(graphics)),
            }),
            ThreadMode::Dedicated => {
                let (sender, receiver): (Sender<Job>, Receiver<Job>) = mpsc::channel();
                let thread = thread::Builder::new()
                    .name("deferred_draw render".to_string())
                    .spawn(move || {
                        let mut graphics = graphics;
                        // drains everything posted before the sender is dropped
                        while let Ok(job) = receiver.recv() {
                            job(graphics.as_mut());
                        }
                        logwise::info_sync!("render thread exiting");
                    })
                    .map_err(|e| Error::Unsupported(format!("spawning render thread: {e}")))?;
                Ok(RenderThread {
                    imp: Imp::Dedicated {
                        sender: Some(sender),
                        thread: Some(thread),
                    },
                })
            }
        }
    }

    /// Runs `job` after everything posted before it, without waiting.
    pub(crate) fn post(&self, job: Job) -> Result<(), Error> {
        match &self.imp {
            Imp::Dedicated { sender, .. } => sender
                .as_ref()
                .ok_or_else(thread_gone)?
                .send(job)
                .map_err(|_| thread_gone()),
            Imp::Inline(graphics) => {
                let mut g = graphics.lock().unwrap();
                job(g.as_mut());
                Ok(())
            }
        }
    }

    /// Runs `f` on the render thread and waits for its result.
    pub(crate) fn call<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut dyn Graphics) -> R + Send + 'static,
        R: Send + 'static,
    {
        let wait = logwise::perfwarn_begin!("RenderThread::call");
        let r = test_executors::sleep_on(self.call_async(f))?;
        drop(wait);
        Ok(r)
    }

    /// Like [RenderThread::call], for async callers.
    pub(crate) async fn call_async<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut dyn Graphics) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (s, r) = r#continue::continuation();
        self.post(Box::new(move |g| {
            s.send(f(g));
        }))?;
        Ok(r.await)
    }

    /// Runs `f`, blocking only when `sync`.  Async results are discarded.
    pub(crate) fn run<F>(&self, f: F, sync: bool) -> Result<(), Error>
    where
        F: FnOnce(&mut dyn Graphics) + Send + 'static,
    {
        if sync {
            self.call(f)
        } else {
            self.post(Box::new(f))
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Imp::Dedicated { sender, thread } = &mut self.imp {
            drop(sender.take());
            if let Some(thread) = thread.take()
                && thread.join().is_err()
            {
                logwise::error_sync!("render thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{
        DrawArgs, ImageId, PixelsArgs, PixelsArgsMut, ShaderId, WindowHandle,
    };
    use crate::shader_ir::ShaderIr;
    use std::sync::Arc;

    /// Counts frames; nothing else.
    struct Frames(u32);

    impl Graphics for Frames {
        fn initialize(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn begin(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn end(&mut self, _present: bool) -> Result<(), Error> {
            self.0 += 1;
            Ok(())
        }
        fn set_window(&mut self, _window: WindowHandle) {}
        fn set_transparent(&mut self, _transparent: bool) {}
        fn set_vsync_enabled(&mut self, _enabled: bool) {}
        fn set_vertices(&mut self, _v: &[f32], _i: &[u32]) -> Result<(), Error> {
            Ok(())
        }
        fn new_image(&mut self, _w: u32, _h: u32) -> Result<ImageId, Error> {
            Ok(ImageId(self.0))
        }
        fn new_screen_framebuffer_image(&mut self, _w: u32, _h: u32) -> Result<ImageId, Error> {
            Ok(ImageId(self.0))
        }
        fn dispose_image(&mut self, _id: ImageId) -> Result<(), Error> {
            Ok(())
        }
        fn write_pixels(&mut self, _id: ImageId, _a: &[PixelsArgs<'_>]) -> Result<(), Error> {
            Ok(())
        }
        fn read_pixels(&mut self, _id: ImageId, _a: &mut [PixelsArgsMut<'_>]) -> Result<(), Error> {
            Ok(())
        }
        fn new_shader(&mut self, _ir: &Arc<ShaderIr>) -> Result<ShaderId, Error> {
            Ok(ShaderId(0))
        }
        fn dispose_shader(&mut self, _id: ShaderId) -> Result<(), Error> {
            Ok(())
        }
        fn draw_triangles(&mut self, _args: &DrawArgs<'_>) -> Result<(), Error> {
            Ok(())
        }
        fn needs_clearing_screen(&self) -> bool {
            false
        }
        fn max_image_size(&self) -> usize {
            0
        }
    }

    #[test]
    fn posts_run_in_order_before_a_call() {
        for mode in [ThreadMode::Dedicated, ThreadMode::Inline] {
            let rt = RenderThread::new(Box::new(Frames(0)), mode).unwrap();
            for _ in 0..10 {
                rt.run(|g| _ = g.end(true), false).unwrap();
            }
            let id = rt.call(|g| g.new_image(1, 1)).unwrap().unwrap();
            assert_eq!(id, ImageId(10));
        }
    }
}
