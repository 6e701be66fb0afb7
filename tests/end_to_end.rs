// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The whole pipeline over the software D3D12 device.

mod common;

use common::{quad, red};
use deferred_draw::{
    Blend, Config, Context, DrawRequest, Error, FillRule, Image, Rect, Shader, builtin,
};

const RED: [u8; 4] = [255, 0, 0, 255];
const CLEAR: [u8; 4] = [0, 0, 0, 0];

fn software_context() -> Context {
    Context::new(Config {
        use_warp: true,
        use_debug_layer: true,
        ..Config::default()
    })
    .unwrap()
}

/// A handle no real window has, accepted only by the software swap chain.
#[cfg(not(windows))]
fn window() -> deferred_draw::WindowHandle {
    use raw_window_handle::{RawWindowHandle, Win32WindowHandle};
    use std::num::NonZeroIsize;
    deferred_draw::WindowHandle(RawWindowHandle::Win32(Win32WindowHandle::new(
        NonZeroIsize::new(1).unwrap(),
    )))
}

fn fill<'a>(
    dst: &'a Image,
    shader: &'a Shader,
    vertices: &'a [f32],
    indices: &'a [u32],
) -> DrawRequest<'a> {
    DrawRequest {
        dst,
        srcs: [None; 4],
        vertices,
        indices,
        blend: Blend::SOURCE_OVER,
        dst_region: dst.bounds(),
        src_regions: [Rect::default(); 4],
        shader,
        uniforms: &[],
        fill_rule: FillRule::FillAll,
    }
}

fn pixel(context: &Context, image: &Image, x: i32, y: i32) -> Vec<u8> {
    context
        .read_pixels(image, &[Rect::new(x, y, x + 1, y + 1)])
        .unwrap()
        .remove(0)
}

#[test]
fn a_red_triangle() {
    let context = software_context();
    let image = context.new_image(4, 4).unwrap();
    let shader = context.new_shader(builtin::color_program());
    let vertices = [red(0.0, 0.0), red(4.0, 0.0), red(0.0, 4.0)].concat();
    context
        .draw_triangles(&fill(&image, &shader, &vertices, &[0, 1, 2]))
        .unwrap();
    context.flush_commands(true).unwrap();

    assert_eq!(pixel(&context, &image, 0, 0), RED);
    assert_eq!(pixel(&context, &image, 1, 1), RED);
    assert_eq!(pixel(&context, &image, 3, 3), CLEAR);
}

#[test]
fn written_pixels_feed_a_textured_draw() {
    let context = software_context();
    let src = context.new_image(2, 2).unwrap();
    let dst = context.new_image(4, 4).unwrap();
    let shader = context.new_shader(builtin::texture_program());
    let blue = [0u8, 0, 255, 255].repeat(4);
    context
        .write_pixels(&src, Rect::new(0, 0, 2, 2), blue.clone())
        .unwrap();

    let (vertices, indices) = quad(4.0, 4.0, [0.5, 0.5], [1.0; 4]);
    context
        .draw_triangles(&DrawRequest {
            srcs: [Some(&src), None, None, None],
            src_regions: [src.bounds(), Rect::default(), Rect::default(), Rect::default()],
            ..fill(&dst, &shader, &vertices, &indices)
        })
        .unwrap();
    context.flush_commands(true).unwrap();

    assert_eq!(pixel(&context, &dst, 2, 2), [0, 0, 255, 255]);
    assert_eq!(
        context.read_pixels(&src, &[src.bounds()]).unwrap(),
        vec![blue]
    );
}

/// A five-pointed star inscribed in a circle of radius 7 around `(8, 8)`, as a fan of three
/// triangles over its self-intersecting outline.
fn pentagram() -> (Vec<f32>, Vec<u32>) {
    let point = |k: usize| {
        let a = std::f32::consts::TAU * k as f32 / 5.0;
        red(8.0 + 7.0 * a.sin(), 8.0 - 7.0 * a.cos())
    };
    let vertices = [point(0), point(2), point(4), point(1), point(3)].concat();
    (vertices, vec![0, 1, 2, 0, 2, 3, 0, 3, 4])
}

#[test]
fn fill_rules_decide_the_pentagram_center() {
    let context = software_context();
    let shader = context.new_shader(builtin::color_program());
    let (vertices, indices) = pentagram();
    let mut images = Vec::new();
    for rule in [FillRule::FillAll, FillRule::NonZero, FillRule::EvenOdd] {
        let image = context.new_image(16, 16).unwrap();
        context
            .draw_triangles(&DrawRequest {
                fill_rule: rule,
                ..fill(&image, &shader, &vertices, &indices)
            })
            .unwrap();
        images.push(image);
    }
    context.flush_commands(true).unwrap();

    let center: Vec<Vec<u8>> = images.iter().map(|i| pixel(&context, i, 8, 8)).collect();
    let tip: Vec<Vec<u8>> = images.iter().map(|i| pixel(&context, i, 8, 3)).collect();
    assert_eq!(center, vec![RED.to_vec(), RED.to_vec(), CLEAR.to_vec()]);
    assert_eq!(tip, vec![RED.to_vec(); 3]);
}

#[test]
fn blend_modes() {
    let context = software_context();
    let image = context.new_image(4, 4).unwrap();
    let shader = context.new_shader(builtin::color_program());
    let (opaque, indices) = quad(4.0, 4.0, [0.0; 2], [1.0, 0.0, 0.0, 1.0]);
    let (transparent, _) = quad(4.0, 4.0, [0.0; 2], [0.0; 4]);

    context
        .draw_triangles(&fill(&image, &shader, &opaque, &indices))
        .unwrap();
    context
        .draw_triangles(&fill(&image, &shader, &transparent, &indices))
        .unwrap();
    context.flush_commands(true).unwrap();
    assert_eq!(pixel(&context, &image, 1, 1), RED);

    context
        .draw_triangles(&DrawRequest {
            blend: Blend::COPY,
            ..fill(&image, &shader, &transparent, &indices)
        })
        .unwrap();
    context.flush_commands(true).unwrap();
    assert_eq!(pixel(&context, &image, 1, 1), CLEAR);
}

#[test]
fn dump_png_encodes_the_region() {
    let context = software_context();
    let image = context.new_image(3, 2).unwrap();
    context
        .write_pixels(&image, Rect::new(0, 0, 3, 2), vec![10u8; 24])
        .unwrap();
    let png = context.dump_png(&image, true, None).unwrap();
    assert_eq!(&png[..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
    let partial = context
        .dump_png(&image, false, Some(Rect::new(1, 0, 2, 1)))
        .unwrap();
    assert_eq!(&partial[..8], &png[..8]);
}

#[cfg(not(windows))]
#[test]
fn screen_frames_across_a_resize() {
    let context = software_context();
    assert!(context.new_screen_framebuffer_image(32, 16).is_ok());
    // without a window the backend rejects the screen, and the error latches
    assert!(matches!(
        context.flush_commands(true),
        Err(Error::InvalidArgument(_))
    ));

    let context = software_context();
    context.set_window(window()).unwrap();
    let screen = context.new_screen_framebuffer_image(32, 16).unwrap();
    let shader = context.new_shader(builtin::color_program());
    let (vertices, indices) = quad(32.0, 16.0, [0.0; 2], [1.0, 0.0, 0.0, 1.0]);
    context
        .draw_triangles(&fill(&screen, &shader, &vertices, &indices))
        .unwrap();
    context.flush_commands(true).unwrap();

    let screen = context.new_screen_framebuffer_image(64, 32).unwrap();
    let (vertices, indices) = quad(64.0, 32.0, [0.0; 2], [1.0, 0.0, 0.0, 1.0]);
    for _ in 0..3 {
        context
            .draw_triangles(&fill(&screen, &shader, &vertices, &indices))
            .unwrap();
        context.flush_commands(true).unwrap();
    }
    assert!(context.read_pixels(&screen, &[Rect::new(0, 0, 1, 1)]).is_err());
}

#[test]
fn images_disposed_mid_frame_stay_usable_until_flushed() {
    let context = software_context();
    let shader = context.new_shader(builtin::color_program());
    let (vertices, indices) = quad(4.0, 4.0, [0.0; 2], [1.0, 0.0, 0.0, 1.0]);
    for _ in 0..5 {
        let image = context.new_image(4, 4).unwrap();
        context
            .draw_triangles(&fill(&image, &shader, &vertices, &indices))
            .unwrap();
        context.dispose_image(&image);
        context.flush_commands(true).unwrap();
    }
    context.dispose_shader(&shader);
    context.flush_commands(true).unwrap();
}

#[test]
fn backend_limits_and_precompiled_shaders() {
    let context = software_context();
    assert_eq!(context.max_image_size(), 16384);
    assert!(context.needs_clearing_screen());
    assert!(context.new_image(16384, 1).is_ok());
    assert!(context.new_image(16385, 1).is_err());

    context
        .register_precompiled_shader("float4 main() : SV_Target { return 1; }", &[1], &[2])
        .unwrap();
    assert!(matches!(
        context.register_precompiled_shader("float4 main() : SV_Target { return 1; }", &[1], &[2]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn an_empty_draw_leaves_the_context_usable() {
    let context = software_context();
    let image = context.new_image(4, 4).unwrap();
    let shader = context.new_shader(builtin::color_program());
    context.flush_commands(false).unwrap();

    context
        .draw_triangles(&fill(&image, &shader, &[], &[]))
        .unwrap();
    context.flush_commands(true).unwrap();

    let vertices = [red(0.0, 0.0), red(4.0, 0.0), red(0.0, 4.0)].concat();
    context
        .draw_triangles(&fill(&image, &shader, &vertices, &[]))
        .unwrap();
    context
        .draw_triangles(&fill(&image, &shader, &vertices, &[0, 1, 2]))
        .unwrap();
    context.flush_commands(true).unwrap();
    assert_eq!(pixel(&context, &image, 0, 0), RED);
}

#[cfg(not(windows))]
#[test]
fn hardware_contexts_need_the_native_runtime() {
    let r = Context::new(Config {
        use_warp: false,
        ..Config::default()
    });
    assert!(matches!(r, Err(Error::Unsupported(_))));
}
