use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::foundation::core::{FrameRGBA, Resolution};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Composite `src` over an opaque background, writing opaque RGBA8 into `dst`.
pub fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    src_is_premul: bool,
    bg_rgba: [u8; 4],
) -> CaptureResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(CaptureError::encoding(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg = [
        u16::from(bg_rgba[0]),
        u16::from(bg_rgba[1]),
        u16::from(bg_rgba[2]),
    ];

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255 - a;
        for c in 0..3 {
            let fg = if src_is_premul {
                u16::from(s[c])
            } else {
                mul_div255(u16::from(s[c]), a)
            };
            d[c] = (fg + mul_div255(bg[c], inv)).min(255) as u8;
        }
        d[3] = 255;
    }

    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

/// Flatten a sampled frame and scale it to the output size.
pub fn prepare_frame(
    frame: &FrameRGBA,
    out: Resolution,
    bg_rgba: [u8; 4],
) -> CaptureResult<RgbaImage> {
    frame.validate()?;

    let mut flat = vec![0u8; frame.data.len()];
    flatten_to_opaque_rgba8(&mut flat, &frame.data, frame.premultiplied, bg_rgba)?;
    let img = RgbaImage::from_raw(frame.width, frame.height, flat)
        .ok_or_else(|| CaptureError::frame_capture("frame buffer does not match its size"))?;

    if frame.resolution() == out {
        return Ok(img);
    }
    Ok(imageops::resize(
        &img,
        out.width,
        out.height,
        FilterType::Triangle,
    ))
}

/// [`prepare_frame`], returned as an opaque straight-alpha [`FrameRGBA`].
pub fn prepare_frame_rgba(
    frame: &FrameRGBA,
    out: Resolution,
    bg_rgba: [u8; 4],
) -> CaptureResult<FrameRGBA> {
    let img = prepare_frame(frame, out, bg_rgba)?;
    Ok(FrameRGBA {
        width: img.width(),
        height: img.height(),
        data: img.into_raw(),
        premultiplied: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_premul_over_black_produces_expected_rgb() {
        // Premultiplied red @ 50% alpha.
        let src = vec![128u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, true, [0, 0, 0, 255]).unwrap();
        assert_eq!(dst, vec![128u8, 0, 0, 255]);
    }

    #[test]
    fn flatten_straight_over_black_produces_expected_rgb() {
        let src = vec![255u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, false, [0, 0, 0, 255]).unwrap();
        assert_eq!(dst, vec![128u8, 0, 0, 255]);
    }

    #[test]
    fn flatten_alpha_0_returns_bg() {
        let src = vec![0u8, 0, 0, 0];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src, true, [10, 20, 30, 255]).unwrap();
        assert_eq!(dst, vec![10, 20, 30, 255]);
    }

    #[test]
    fn prepare_frame_scales_to_output() {
        let frame = FrameRGBA::solid(8, 8, [0, 255, 0, 255]);
        let out = Resolution {
            width: 4,
            height: 2,
        };
        let img = prepare_frame(&frame, out, [0, 0, 0, 255]).unwrap();
        assert_eq!(img.dimensions(), (4, 2));
        assert_eq!(img.get_pixel(1, 1).0, [0, 255, 0, 255]);
    }
}
