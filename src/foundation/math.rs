pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

/// `round(255 * percent / 100)` for an opacity percentage in `0..=100`.
pub(crate) fn percent_to_alpha(percent: u8) -> u8 {
    let p = u32::from(percent.min(100));
    ((255 * p + 50) / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div255_rounds_to_nearest() {
        assert_eq!(mul_div255_u16(255, 255), 255);
        assert_eq!(mul_div255_u16(128, 255), 128);
        assert_eq!(mul_div255_u8(255, 128), 128);
        assert_eq!(mul_div255_u8(0, 200), 0);
    }

    #[test]
    fn percent_to_alpha_matches_rounding() {
        assert_eq!(percent_to_alpha(0), 0);
        assert_eq!(percent_to_alpha(100), 255);
        // 255 * 0.8 = 204
        assert_eq!(percent_to_alpha(80), 204);
        // 255 * 0.5 = 127.5 rounds up
        assert_eq!(percent_to_alpha(50), 128);
        assert_eq!(percent_to_alpha(250), 255);
    }
}
