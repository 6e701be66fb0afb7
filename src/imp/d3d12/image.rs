// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Driver-side images.

An offscreen image owns an `R8G8B8A8_UNORM` texture at its internal size.  The screen image owns
nothing: it stands for whichever back buffer the current frame renders into, so its resource
state is tracked per frame slot.

Every operation moves the image into the state it needs and records a transition barrier only
when the state actually changes.
*/

use super::api::{
    CopyBox, CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapType, Device, FRAME_COUNT,
    Format, GraphicsCommandList, HeapType, PlacedFootprint, ResourceBarrier, ResourceDesc,
    ResourceFlags, ResourceId, ResourceStates, TextureCopyLocation, copyable_footprint,
};
use crate::bittricks::internal_image_size;
use crate::error::Error;
use crate::graphics::{ImageId, PixelsArgs, PixelsArgsMut, Rect};

/// Where the screen image lives during the current frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameView {
    pub(crate) index: usize,
    pub(crate) screen_target: Option<ResourceId>,
    pub(crate) screen_rtv: CpuDescriptorHandle,
}

#[derive(Debug)]
pub(crate) struct Image12 {
    id: ImageId,
    width: u32,
    height: u32,
    screen: bool,
    states: [ResourceStates; FRAME_COUNT],
    texture: Option<ResourceId>,
    stencil: Option<ResourceId>,
    rtv_heap: Option<DescriptorHeapId>,
    dsv_heap: Option<DescriptorHeapId>,
    uploading_staging_buffers: Vec<ResourceId>,
}

/// A readback recorded on the copy list.  Its contents are valid once the list has executed.
#[derive(Debug)]
pub(crate) struct Readback {
    buffer: ResourceId,
    footprint: PlacedFootprint,
    region: Rect,
}

fn union_region<'a>(regions: impl Iterator<Item = &'a Rect>) -> Rect {
    regions.fold(Rect::default(), |acc, r| acc.union(r))
}

fn check_regions<'a>(
    bounds: Rect,
    regions: impl Iterator<Item = (&'a Rect, usize)>,
) -> Result<(), Error> {
    let mut seen: Vec<Rect> = Vec::new();
    for (region, len) in regions {
        if region.is_empty() || !bounds.contains(region) {
            return Err(Error::InvalidArgument(format!(
                "region {region} is outside {bounds}"
            )));
        }
        let expected = 4 * region.width() as usize * region.height() as usize;
        if len != expected {
            return Err(Error::InvalidArgument(format!(
                "region {region} needs {expected} bytes, got {len}"
            )));
        }
        if cfg!(debug_assertions) && seen.iter().any(|s| s.overlaps(region)) {
            return Err(Error::InvalidArgument(format!(
                "region {region} overlaps another region of the same call"
            )));
        }
        seen.push(*region);
    }
    Ok(())
}

impl Image12 {
    pub(crate) fn new(
        device: &mut dyn Device,
        id: ImageId,
        width: u32,
        height: u32,
    ) -> Result<Self, Error> {
        let state = ResourceStates::PIXEL_SHADER_RESOURCE;
        let texture = device.create_committed_resource(
            HeapType::Default,
            &ResourceDesc::texture2d(
                internal_image_size(width),
                internal_image_size(height),
                Format::R8G8B8A8Unorm,
                ResourceFlags::ALLOW_RENDER_TARGET,
            ),
            state,
        )?;
        Ok(Image12 {
            id,
            width,
            height,
            screen: false,
            states: [state; FRAME_COUNT],
            texture: Some(texture),
            stencil: None,
            rtv_heap: None,
            dsv_heap: None,
            uploading_staging_buffers: Vec::new(),
        })
    }

    pub(crate) fn new_screen(id: ImageId, width: u32, height: u32) -> Self {
        Image12 {
            id,
            width,
            height,
            screen: true,
            states: [ResourceStates::PRESENT; FRAME_COUNT],
            texture: None,
            stencil: None,
            rtv_heap: None,
            dsv_heap: None,
            uploading_staging_buffers: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> ImageId {
        self.id
    }

    pub(crate) fn is_screen(&self) -> bool {
        self.screen
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// The screen uses its logical size; everything else is rounded up.
    pub(crate) fn internal_size(&self) -> (u32, u32) {
        if self.screen {
            (self.width, self.height)
        } else {
            (internal_image_size(self.width), internal_image_size(self.height))
        }
    }

    pub(crate) fn resource(&self, frame: &FrameView) -> Result<ResourceId, Error> {
        let resource = if self.screen {
            frame.screen_target
        } else {
            self.texture
        };
        resource.ok_or_else(|| {
            Error::InvalidArgument(format!("{} has no resource in this frame", self.id))
        })
    }

    fn slot(&self, frame: &FrameView) -> usize {
        if self.screen { frame.index } else { 0 }
    }

    pub(crate) fn state(&self, frame: &FrameView) -> ResourceStates {
        self.states[self.slot(frame)]
    }

    /// Moves the image into `new_state`, returning the barrier to record if that changes anything.
    pub(crate) fn transition(
        &mut self,
        frame: &FrameView,
        new_state: ResourceStates,
    ) -> Result<Option<ResourceBarrier>, Error> {
        let slot = self.slot(frame);
        let old_state = self.states[slot];
        if old_state == new_state {
            return Ok(None);
        }
        let resource = self.resource(frame)?;
        self.states[slot] = new_state;
        Ok(Some(ResourceBarrier {
            resource,
            before: old_state,
            after: new_state,
        }))
    }

    fn ensure_render_target_view(&mut self, device: &mut dyn Device) -> Result<(), Error> {
        if self.screen || self.rtv_heap.is_some() {
            return Ok(());
        }
        let Some(texture) = self.texture else {
            return Err(Error::InvalidArgument(format!("{} was disposed", self.id)));
        };
        let heap = device.create_descriptor_heap(DescriptorHeapType::Rtv, 1, false)?;
        self.rtv_heap = Some(heap);
        device.create_render_target_view(texture, CpuDescriptorHandle::heap_start(heap));
        Ok(())
    }

    fn ensure_depth_stencil_view(&mut self, device: &mut dyn Device) -> Result<CpuDescriptorHandle, Error> {
        if self.screen {
            return Err(Error::InvalidArgument(
                "stencils are not available on the screen framebuffer".to_string(),
            ));
        }
        if let Some(heap) = self.dsv_heap {
            return Ok(CpuDescriptorHandle::heap_start(heap));
        }
        let heap = device.create_descriptor_heap(DescriptorHeapType::Dsv, 1, false)?;
        self.dsv_heap = Some(heap);
        let stencil = match self.stencil {
            Some(stencil) => stencil,
            None => {
                let stencil = device.create_committed_resource(
                    HeapType::Default,
                    &ResourceDesc::texture2d(
                        internal_image_size(self.width),
                        internal_image_size(self.height),
                        Format::D24UnormS8Uint,
                        ResourceFlags::ALLOW_DEPTH_STENCIL,
                    ),
                    ResourceStates::DEPTH_WRITE,
                )?;
                self.stencil = Some(stencil);
                stencil
            }
        };
        let dsv = CpuDescriptorHandle::heap_start(heap);
        device.create_depth_stencil_view(stencil, dsv);
        Ok(dsv)
    }

    /// Binds the image as the draw list's render target.  With `use_stencil`, also binds and
    /// clears its stencil buffer.
    pub(crate) fn set_as_render_target(
        &mut self,
        device: &mut dyn Device,
        list: &mut GraphicsCommandList,
        frame: &FrameView,
        use_stencil: bool,
    ) -> Result<(), Error> {
        self.ensure_render_target_view(device)?;

        if self.screen {
            if use_stencil {
                return Err(Error::InvalidArgument(
                    "stencils are not available on the screen framebuffer".to_string(),
                ));
            }
            list.om_set_render_targets(frame.screen_rtv, None);
            return Ok(());
        }

        let Some(rtv_heap) = self.rtv_heap else {
            return Err(Error::InvalidArgument(format!("{} has no render target view", self.id)));
        };
        let rtv = CpuDescriptorHandle::heap_start(rtv_heap);
        if !use_stencil {
            list.om_set_render_targets(rtv, None);
            return Ok(());
        }

        let dsv = self.ensure_depth_stencil_view(device)?;
        list.om_set_stencil_ref(0);
        list.om_set_render_targets(rtv, Some(dsv));
        list.clear_stencil(dsv, 0);
        Ok(())
    }

    /// Records uploads of `args` on the copy list.
    ///
    /// All rects share one staging buffer covering their union; it is released once the copy
    /// list has executed.
    pub(crate) fn write_pixels(
        &mut self,
        device: &mut dyn Device,
        list: &mut GraphicsCommandList,
        frame: &FrameView,
        args: &[PixelsArgs<'_>],
    ) -> Result<(), Error> {
        if self.screen {
            return Err(Error::InvalidArgument(
                "write_pixels cannot be called on the screen".to_string(),
            ));
        }
        let bounds = Rect::sized(self.width, self.height);
        check_regions(bounds, args.iter().map(|a| (&a.region, a.pixels.len())))?;
        if args.is_empty() {
            return Ok(());
        }
        let texture = self.resource(frame)?;

        let region = union_region(args.iter().map(|a| &a.region));
        let (footprint, total) = copyable_footprint(&ResourceDesc::texture2d(
            region.width() as u32,
            region.height() as u32,
            Format::R8G8B8A8Unorm,
            ResourceFlags::ALLOW_RENDER_TARGET,
        ));
        let staging = device.create_committed_resource(
            HeapType::Upload,
            &ResourceDesc::buffer(total),
            ResourceStates::GENERIC_READ,
        )?;
        self.uploading_staging_buffers.push(staging);

        if let Some(barrier) = self.transition(frame, ResourceStates::COPY_DEST)? {
            list.resource_barrier(&[barrier]);
        }

        let row_pitch = footprint.row_pitch as usize;
        device.map(staging, &mut |mapped| {
            for a in args {
                let w = 4 * a.region.width() as usize;
                let x = 4 * (a.region.min_x - region.min_x) as usize;
                for (j, row) in a.pixels.chunks_exact(w).enumerate() {
                    let at = (a.region.min_y - region.min_y) as usize * row_pitch + j * row_pitch + x;
                    mapped[at..at + w].copy_from_slice(row);
                }
            }
        })?;

        for a in args {
            list.copy_texture_region(
                TextureCopyLocation::Subresource(texture),
                a.region.min_x as u32,
                a.region.min_y as u32,
                TextureCopyLocation::PlacedFootprint(staging, footprint),
                CopyBox {
                    left: (a.region.min_x - region.min_x) as u32,
                    top: (a.region.min_y - region.min_y) as u32,
                    right: (a.region.max_x - region.min_x) as u32,
                    bottom: (a.region.max_y - region.min_y) as u32,
                },
            );
        }
        Ok(())
    }

    /// Records a copy of the union of `args` into a readback buffer.
    pub(crate) fn record_read_pixels(
        &mut self,
        device: &mut dyn Device,
        list: &mut GraphicsCommandList,
        frame: &FrameView,
        args: &[PixelsArgsMut<'_>],
    ) -> Result<Option<Readback>, Error> {
        if self.screen {
            return Err(Error::InvalidArgument(
                "read_pixels cannot be called on the screen".to_string(),
            ));
        }
        let bounds = Rect::sized(self.width, self.height);
        check_regions(bounds, args.iter().map(|a| (&a.region, a.pixels.len())))?;
        if args.is_empty() {
            return Ok(None);
        }
        let texture = self.resource(frame)?;

        let region = union_region(args.iter().map(|a| &a.region));
        let (footprint, total) = copyable_footprint(&ResourceDesc::texture2d(
            region.width() as u32,
            region.height() as u32,
            Format::R8G8B8A8Unorm,
            ResourceFlags::ALLOW_RENDER_TARGET,
        ));
        let buffer = device.create_committed_resource(
            HeapType::Readback,
            &ResourceDesc::buffer(total),
            ResourceStates::COPY_DEST,
        )?;

        let barrier = match self.transition(frame, ResourceStates::COPY_SOURCE) {
            Ok(barrier) => barrier,
            Err(e) => {
                device.release_resource(buffer);
                return Err(e);
            }
        };
        if let Some(barrier) = barrier {
            list.resource_barrier(&[barrier]);
        }
        list.copy_texture_region(
            TextureCopyLocation::PlacedFootprint(buffer, footprint),
            0,
            0,
            TextureCopyLocation::Subresource(texture),
            CopyBox {
                left: region.min_x as u32,
                top: region.min_y as u32,
                right: region.max_x as u32,
                bottom: region.max_y as u32,
            },
        );
        Ok(Some(Readback {
            buffer,
            footprint,
            region,
        }))
    }

    pub(crate) fn release_uploading_staging_buffers(&mut self, device: &mut dyn Device) {
        for buffer in self.uploading_staging_buffers.drain(..) {
            device.release_resource(buffer);
        }
    }

    /// Releases every GPU object the image owns.
    pub(crate) fn dispose(&mut self, device: &mut dyn Device) {
        if let Some(heap) = self.dsv_heap.take() {
            device.release_descriptor_heap(heap);
        }
        if let Some(heap) = self.rtv_heap.take() {
            device.release_descriptor_heap(heap);
        }
        if let Some(stencil) = self.stencil.take() {
            device.release_resource(stencil);
        }
        if let Some(texture) = self.texture.take() {
            device.release_resource(texture);
        }
        self.release_uploading_staging_buffers(device);
    }

    #[cfg(test)]
    pub(crate) fn texture(&self) -> Option<ResourceId> {
        self.texture
    }
}

impl Readback {
    /// Copies the executed readback out to each destination, then releases the buffer.
    pub(crate) fn finish(
        self,
        device: &mut dyn Device,
        args: &mut [PixelsArgsMut<'_>],
    ) -> Result<(), Error> {
        let stride = self.footprint.row_pitch as usize;
        let region = self.region;
        let result = device.map(self.buffer, &mut |mapped| {
            for a in args.iter_mut() {
                let w = 4 * a.region.width() as usize;
                let offset = 4 * (a.region.min_x - region.min_x) as usize
                    + stride * (a.region.min_y - region.min_y) as usize;
                for (j, row) in a.pixels.chunks_exact_mut(w).enumerate() {
                    let at = offset + j * stride;
                    row.copy_from_slice(&mapped[at..at + w]);
                }
            }
        });
        device.release_resource(self.buffer);
        result
    }

    /// Drops a readback whose copy never ran.
    pub(crate) fn abandon(self, device: &mut dyn Device) {
        device.release_resource(self.buffer);
    }
}
