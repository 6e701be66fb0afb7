// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A backend that records every call it receives.

#![allow(dead_code)]

use deferred_draw::{
    Config, Context, DrawArgs, DstRegion, Error, FillRule, Graphics, ImageId, PixelsArgs,
    PixelsArgsMut, Rect, ShaderId, ShaderIr, ThreadMode, WindowHandle,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin,
    End(bool),
    SetWindow,
    SetVsync(bool),
    SetVertices { vertices: usize, indices: Vec<u32> },
    NewImage(u32, u32),
    NewScreen(u32, u32),
    DisposeImage(ImageId),
    WritePixels(ImageId, Vec<Rect>),
    ReadPixels(ImageId, Vec<Rect>),
    NewShader(String),
    DisposeShader(ShaderId),
    Draw {
        dst: ImageId,
        regions: Vec<DstRegion>,
        index_offset: usize,
        fill_rule: FillRule,
    },
}

/// Errors the next matching call returns instead of succeeding.
#[derive(Debug, Default)]
pub struct Faults {
    pub begin: Option<Error>,
    pub draw: Option<Error>,
    pub end: Option<Error>,
}

#[derive(Clone, Default)]
pub struct Log {
    calls: Arc<Mutex<Vec<Call>>>,
    faults: Arc<Mutex<Faults>>,
}

impl Log {
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn fail_begin(&self, e: Error) {
        self.faults.lock().unwrap().begin = Some(e);
    }

    pub fn fail_draw(&self, e: Error) {
        self.faults.lock().unwrap().draw = Some(e);
    }

    pub fn fail_end(&self, e: Error) {
        self.faults.lock().unwrap().end = Some(e);
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct Recorder {
    log: Log,
    next_id: u32,
}

impl Recorder {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Graphics for Recorder {
    fn initialize(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.log.push(Call::Begin);
        match self.log.faults.lock().unwrap().begin.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn end(&mut self, present: bool) -> Result<(), Error> {
        self.log.push(Call::End(present));
        match self.log.faults.lock().unwrap().end.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_window(&mut self, _window: WindowHandle) {
        self.log.push(Call::SetWindow);
    }

    fn set_transparent(&mut self, _transparent: bool) {}

    fn set_vsync_enabled(&mut self, enabled: bool) {
        self.log.push(Call::SetVsync(enabled));
    }

    fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), Error> {
        self.log.push(Call::SetVertices {
            vertices: vertices.len(),
            indices: indices.to_vec(),
        });
        Ok(())
    }

    fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId, Error> {
        self.log.push(Call::NewImage(width, height));
        Ok(ImageId(self.id()))
    }

    fn new_screen_framebuffer_image(&mut self, width: u32, height: u32) -> Result<ImageId, Error> {
        self.log.push(Call::NewScreen(width, height));
        Ok(ImageId(self.id()))
    }

    fn dispose_image(&mut self, id: ImageId) -> Result<(), Error> {
        self.log.push(Call::DisposeImage(id));
        Ok(())
    }

    fn write_pixels(&mut self, id: ImageId, args: &[PixelsArgs<'_>]) -> Result<(), Error> {
        self.log
            .push(Call::WritePixels(id, args.iter().map(|a| a.region).collect()));
        Ok(())
    }

    fn read_pixels(&mut self, id: ImageId, args: &mut [PixelsArgsMut<'_>]) -> Result<(), Error> {
        self.log
            .push(Call::ReadPixels(id, args.iter().map(|a| a.region).collect()));
        for a in args.iter_mut() {
            a.pixels.fill(id.0 as u8);
        }
        Ok(())
    }

    fn new_shader(&mut self, ir: &Arc<ShaderIr>) -> Result<ShaderId, Error> {
        self.log.push(Call::NewShader(ir.name().to_string()));
        Ok(ShaderId(self.id()))
    }

    fn dispose_shader(&mut self, id: ShaderId) -> Result<(), Error> {
        self.log.push(Call::DisposeShader(id));
        Ok(())
    }

    fn draw_triangles(&mut self, args: &DrawArgs<'_>) -> Result<(), Error> {
        if let Some(e) = self.log.faults.lock().unwrap().draw.take() {
            return Err(e);
        }
        self.log.push(Call::Draw {
            dst: args.dst,
            regions: args.dst_regions.to_vec(),
            index_offset: args.index_offset,
            fill_rule: args.fill_rule,
        });
        Ok(())
    }

    fn needs_clearing_screen(&self) -> bool {
        false
    }

    fn max_image_size(&self) -> usize {
        4096
    }
}

/// A context over a [Recorder], with backend calls made inline on the calling thread.
pub fn recording_context(config: Config) -> (Context, Log) {
    let log = Log::default();
    let recorder = Recorder {
        log: log.clone(),
        next_id: 0,
    };
    let context = Context::with_graphics(Box::new(recorder), config, ThreadMode::Inline)
        .expect("recording context");
    log.take();
    (context, log)
}

/// `x, y, u, v, r, g, b, a` for an opaque red vertex.
pub fn red(x: f32, y: f32) -> [f32; 8] {
    [x, y, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]
}

/// A one-pixel right triangle at `(x, y)`.
pub fn triangle(x: f32, y: f32) -> Vec<f32> {
    [red(x, y), red(x + 1.0, y), red(x, y + 1.0)].concat()
}

/// Two triangles covering `(0,0)-(w,h)` with one texcoord and color.
pub fn quad(w: f32, h: f32, uv: [f32; 2], color: [f32; 4]) -> (Vec<f32>, Vec<u32>) {
    let vertex = |x: f32, y: f32| [x, y, uv[0], uv[1], color[0], color[1], color[2], color[3]];
    let vertices = [vertex(0.0, 0.0), vertex(w, 0.0), vertex(0.0, h), vertex(w, h)].concat();
    (vertices, vec![0, 1, 2, 1, 3, 2])
}
