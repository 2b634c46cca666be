use crate::foundation::{
    error::{ClipmarkError, ClipmarkResult},
    math::mul_div255_u8,
};

pub type PremulRgba8 = [u8; 4];

/// Source-over for premultiplied RGBA8.
pub fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    let sa = src[3];
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let inv = 255u16 - u16::from(sa);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255_u8(u16::from(dst[i]), inv));
    }
    out
}

/// Blend a premultiplied RGBA8 layer over an opaque RGB8 image in place.
pub fn over_rgb_in_place(dst_rgb: &mut [u8], src_premul: &[u8]) -> ClipmarkResult<()> {
    if dst_rgb.len() % 3 != 0
        || src_premul.len() % 4 != 0
        || dst_rgb.len() / 3 != src_premul.len() / 4
    {
        return Err(ClipmarkError::validation(
            "over_rgb_in_place expects rgb8 and rgba8 buffers with equal pixel counts",
        ));
    }
    for (d, s) in dst_rgb.chunks_exact_mut(3).zip(src_premul.chunks_exact(4)) {
        if s[3] == 0 {
            continue;
        }
        let out = over([d[0], d[1], d[2], 255], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out[..3]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_src_alpha_0_is_noop() {
        let dst = [10, 20, 30, 255];
        assert_eq!(over(dst, [0, 0, 0, 0]), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        assert_eq!(over([0, 0, 0, 255], [255, 0, 0, 255]), [255, 0, 0, 255]);
    }

    #[test]
    fn half_white_over_black_is_mid_grey() {
        // Premultiplied white at 50%.
        let out = over([0, 0, 0, 255], [128, 128, 128, 128]);
        assert_eq!(out, [128, 128, 128, 255]);
    }

    #[test]
    fn rgb_blend_skips_transparent_and_rejects_mismatch() {
        let mut dst = vec![1u8, 2, 3, 4, 5, 6];
        let src = vec![0u8, 0, 0, 0, 255, 255, 255, 255];
        over_rgb_in_place(&mut dst, &src).unwrap();
        assert_eq!(dst, vec![1, 2, 3, 255, 255, 255]);

        assert!(over_rgb_in_place(&mut dst, &src[..4]).is_err());
    }
}
