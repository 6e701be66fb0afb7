// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The screen's back buffers.

On desktops they belong to a flip-model swap chain; on consoles the driver creates them itself
and presents with `PresentX`.  Either way the host owns one render target view per frame slot.

A swap chain moves through [SwapChainState]: it is created on the first screen image, resized
after a present when the screen size changed, and lost when the device goes away.
*/

use super::api::{
    CpuDescriptorHandle, DescriptorHeapId, Device, FRAME_COUNT, Format, HeapType, Platform,
    ResourceDesc, ResourceFlags, ResourceId, ResourceStates, SwapChain, SwapChainDesc,
};
use crate::error::Error;
use crate::graphics::WindowHandle;
use crate::sys::time::{Duration, Instant, sleep};

/// How long an occluded present waits before testing again.
const OCCLUDED_PRESENT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwapChainState {
    Uninitialized,
    Initialized,
    Resizing,
    Lost,
}

pub(crate) struct SwapChainHost {
    swap_chain: Option<Box<dyn SwapChain>>,
    state: SwapChainState,
    rtv_heap: DescriptorHeapId,
    render_targets: [Option<ResourceId>; FRAME_COUNT],
    occluded: bool,
    last_present: Option<Instant>,
    pending_size: Option<(u32, u32)>,
}

impl SwapChainHost {
    pub(crate) fn new(rtv_heap: DescriptorHeapId) -> Self {
        SwapChainHost {
            swap_chain: None,
            state: SwapChainState::Uninitialized,
            rtv_heap,
            render_targets: [None; FRAME_COUNT],
            occluded: false,
            last_present: None,
            pending_size: None,
        }
    }

    pub(crate) fn state(&self) -> SwapChainState {
        self.state
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state == SwapChainState::Initialized
    }

    /// Whether presents go through a DXGI swap chain, as opposed to `PresentX`.
    pub(crate) fn has_swap_chain(&self) -> bool {
        self.swap_chain.is_some()
    }

    pub(crate) fn rtv_heap(&self) -> DescriptorHeapId {
        self.rtv_heap
    }

    pub(crate) fn render_target(&self, frame_index: usize) -> Option<ResourceId> {
        self.render_targets[frame_index]
    }

    pub(crate) fn rtv(&self, frame_index: usize) -> CpuDescriptorHandle {
        CpuDescriptorHandle::heap_start(self.rtv_heap).offset(frame_index as u32)
    }

    /// Creates the swap chain for `window` and returns the first back buffer's index.
    pub(crate) fn init_desktop(
        &mut self,
        platform: &mut dyn Platform,
        device: &mut dyn Device,
        window: WindowHandle,
        width: u32,
        height: u32,
    ) -> Result<usize, Error> {
        if self.swap_chain.is_some() {
            return Err(Error::InvalidArgument(
                "the swap chain is already initialized".to_string(),
            ));
        }
        let desc = SwapChainDesc {
            width,
            height,
            format: Format::B8G8R8A8Unorm,
            buffer_count: FRAME_COUNT as u32,
        };
        let swap_chain = platform.create_swap_chain(device, window, &desc)?;
        let index = swap_chain.current_back_buffer_index();
        self.swap_chain = Some(swap_chain);
        self.create_render_target_views(device)?;
        self.state = SwapChainState::Initialized;
        logwise::info_sync!(
            "swap chain created at {width}x{height}",
            width = logwise::privacy::LogIt(&width),
            height = logwise::privacy::LogIt(&height)
        );
        Ok(index)
    }

    /// Creates displayable render targets for `PresentX`.
    pub(crate) fn init_xbox(
        &mut self,
        device: &mut dyn Device,
        width: u32,
        height: u32,
    ) -> Result<(), Error> {
        let desc = ResourceDesc::texture2d(
            width,
            height,
            Format::B8G8R8A8Unorm,
            ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DISPLAY,
        );
        for i in 0..FRAME_COUNT {
            let target =
                match device.create_committed_resource(HeapType::Default, &desc, ResourceStates::PRESENT) {
                    Ok(target) => target,
                    Err(e) => {
                        self.release_render_targets(device);
                        return Err(e);
                    }
                };
            device.create_render_target_view(target, self.rtv(i));
            self.render_targets[i] = Some(target);
        }
        self.state = SwapChainState::Initialized;
        Ok(())
    }

    fn create_render_target_views(&mut self, device: &mut dyn Device) -> Result<(), Error> {
        let Some(swap_chain) = self.swap_chain.as_mut() else {
            return Ok(());
        };
        for i in 0..FRAME_COUNT {
            let target = match swap_chain.buffer(i as u32) {
                Ok(target) => target,
                Err(e) => {
                    self.release_render_targets(device);
                    return Err(e);
                }
            };
            let rtv = CpuDescriptorHandle::heap_start(self.rtv_heap).offset(i as u32);
            device.create_render_target_view(target, rtv);
            self.render_targets[i] = Some(target);
        }
        Ok(())
    }

    fn release_render_targets(&mut self, device: &mut dyn Device) {
        for target in self.render_targets.iter_mut() {
            if let Some(target) = target.take() {
                device.release_resource(target);
            }
        }
    }

    /// Records a size to apply after the next present.
    pub(crate) fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_size = Some((width, height));
    }

    pub(crate) fn take_pending_resize(&mut self) -> Option<(u32, u32)> {
        self.pending_size.take()
    }

    /// Resizes the back buffers, or recreates the console's render targets.  The GPU must be idle.
    pub(crate) fn resize(
        &mut self,
        device: &mut dyn Device,
        width: u32,
        height: u32,
    ) -> Result<(), Error> {
        self.state = SwapChainState::Resizing;
        self.release_render_targets(device);
        let resized = match self.swap_chain.as_mut() {
            Some(swap_chain) => swap_chain.resize_buffers(FRAME_COUNT as u32, width, height),
            None => Ok(()),
        };
        let recreated = resized.and_then(|()| {
            if self.swap_chain.is_some() {
                self.create_render_target_views(device)
            } else {
                self.init_xbox(device, width, height)
            }
        });
        match recreated {
            Ok(()) => {
                self.state = SwapChainState::Initialized;
                logwise::info_sync!(
                    "swap chain resized to {width}x{height}",
                    width = logwise::privacy::LogIt(&width),
                    height = logwise::privacy::LogIt(&height)
                );
                Ok(())
            }
            Err(e) => {
                self.state = SwapChainState::Lost;
                Err(e)
            }
        }
    }

    pub(crate) fn current_back_buffer_index(&self) -> Option<usize> {
        self.swap_chain
            .as_ref()
            .map(|swap_chain| swap_chain.current_back_buffer_index())
    }

    /// Presents the current back buffer.
    ///
    /// While the output is occluded, presents only test whether it became visible again, at most
    /// once per [OCCLUDED_PRESENT_INTERVAL].
    pub(crate) fn present(&mut self, vsync: bool) -> Result<(), Error> {
        let Some(swap_chain) = self.swap_chain.as_mut() else {
            return Err(Error::InvalidArgument(
                "present without a swap chain".to_string(),
            ));
        };
        let sync_interval = if !self.occluded && vsync { 1 } else { 0 };
        let was_occluded = self.occluded;
        self.occluded = match swap_chain.present(sync_interval, was_occluded) {
            Ok(occluded) => occluded,
            Err(e) => {
                if e == Error::DeviceLost {
                    self.state = SwapChainState::Lost;
                }
                return Err(e);
            }
        };
        if self.occluded != was_occluded {
            if self.occluded {
                logwise::warn_sync!("output occluded; throttling presents");
            } else {
                logwise::info_sync!("output visible again");
            }
        }

        let now = Instant::now();
        if self.occluded
            && let Some(last) = self.last_present
        {
            let elapsed = now.duration_since(last);
            if elapsed < OCCLUDED_PRESENT_INTERVAL {
                sleep(OCCLUDED_PRESENT_INTERVAL - elapsed);
            }
        }
        self.last_present = Some(now);
        Ok(())
    }

    /// Presents frame `frame_index`'s render target on a console.
    pub(crate) fn present_x(&mut self, device: &mut dyn Device, frame_index: usize) -> Result<(), Error> {
        let target = self.render_targets[frame_index].ok_or_else(|| {
            Error::InvalidArgument("present without a render target".to_string())
        })?;
        device.present_x(target)
    }

    pub(crate) fn release(&mut self, device: &mut dyn Device) {
        self.release_render_targets(device);
        self.swap_chain = None;
        self.state = SwapChainState::Uninitialized;
    }
}
