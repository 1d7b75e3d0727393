//! Normalisation of camera pixel layouts to the BGRA the virtual stream carries.
use lumix_core::prelude::*;

// Limited-range Rec.709, 8.8 fixed point.
const R_V: i32 = 459;
const G_U: i32 = 55;
const G_V: i32 = 136;
const B_U: i32 = 541;

#[inline(always)]
fn yuv_to_bgra(y: i32, u: i32, v: i32) -> [u8; 4] {
    let c = (y - 16).max(0) * 298;
    let d = u - 128;
    let e = v - 128;
    let r = (c + R_V * e + 128) >> 8;
    let g = (c - G_U * d - G_V * e + 128) >> 8;
    let b = (c + B_U * d + 128) >> 8;
    [
        b.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        r.clamp(0, 255) as u8,
        255,
    ]
}

/// Convert one packed YUYV row into BGRA. Extra bytes on either side are ignored.
pub fn yuyv_row_to_bgra(src: &[u8], dst: &mut [u8]) {
    for (out, px) in dst.chunks_exact_mut(8).zip(src.chunks_exact(4)) {
        let (y0, u, y1, v) = (px[0] as i32, px[1] as i32, px[2] as i32, px[3] as i32);
        out[..4].copy_from_slice(&yuv_to_bgra(y0, u, v));
        out[4..].copy_from_slice(&yuv_to_bgra(y1, u, v));
    }
}

/// Whether [`to_bgra`] can turn frames in `code` into BGRA.
pub fn is_convertible(code: FourCc) -> bool {
    code == FourCc::BGRA || code == FourCc::YUYV
}

/// Copy or convert a camera frame into a BGRA buffer from `pool`.
///
/// Returns `None` when the pool is exhausted or the layout is not one the
/// pipeline understands; callers report that as a dropped frame.
pub fn to_bgra(pool: &PixelBufferPool, source: &PixelView<'_>, code: FourCc) -> Option<FrameBuffer> {
    match &code.bytes() {
        b"BGRA" => pool.copy_buffer(source),
        b"YUYV" => {
            let mut dst = pool.acquire_buffer()?;
            let rows = source.height.min(dst.height());
            for y in 0..rows {
                yuyv_row_to_bgra(source.row(y), dst.row_mut(y));
            }
            Some(dst)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_range_extremes() {
        let mut out = [0u8; 8];
        yuyv_row_to_bgra(&[16, 128, 235, 128], &mut out);
        assert_eq!(out, [0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn only_bgra_and_yuyv_convert() {
        assert!(is_convertible(FourCc::BGRA));
        assert!(is_convertible(FourCc::YUYV));
        assert!(!is_convertible(FourCc::new(*b"MJPG")));
        assert!(!is_convertible(FourCc::new(*b"AR24")));
    }

    #[test]
    fn yuyv_frame_converts_into_pool() {
        let res = Resolution::new(4, 2).unwrap();
        let pool = PixelBufferPool::create(res, FourCc::BGRA, 3).unwrap();
        let src = [235u8, 128, 235, 128].repeat(4);
        let frame = to_bgra(&pool, &PixelView::new(&src, 4, 2, 8), FourCc::YUYV).unwrap();
        assert!(frame.pixels(1).iter().all(|&b| b == 255));
        assert!(to_bgra(&pool, &PixelView::new(&src, 4, 2, 8), FourCc::new(*b"MJPG")).is_none());
    }
}
