//! (微)帧号运算
//!
//! HFNUM 中的帧号只有 14 位，所有调度帧号都在 2^14 上回绕。

/// 帧号最大值
pub const HFNUM_MAX_FRNUM: u16 = 0x3FFF;

/// 一帧内的微帧位（低 3 位）
pub const MICROFRAME_MASK: u16 = 0x7;

/// `frame + inc`，按帧号宽度回绕
pub fn frame_num_inc(frame: u16, inc: u32) -> u16 {
    ((frame as u32).wrapping_add(inc) & HFNUM_MAX_FRNUM as u32) as u16
}

/// `a` 不晚于 `b`（两者相距不超过半个帧轮）
pub fn frame_num_le(a: u16, b: u16) -> bool {
    (b.wrapping_sub(a) & HFNUM_MAX_FRNUM) <= (HFNUM_MAX_FRNUM >> 1)
}

/// 对齐到该帧的最后一个微帧
pub fn last_microframe(frame: u16) -> u16 {
    (frame | MICROFRAME_MASK) & HFNUM_MAX_FRNUM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_wraps() {
        assert_eq!(frame_num_inc(100, 4), 104);
        assert_eq!(frame_num_inc(HFNUM_MAX_FRNUM, 1), 0);
        assert_eq!(frame_num_inc(0x3FFA, 10), 4);
    }

    #[test]
    fn test_ordering_across_wrap() {
        assert!(frame_num_le(100, 100));
        assert!(frame_num_le(100, 101));
        assert!(!frame_num_le(101, 100));
        assert!(frame_num_le(0x3FFE, 2));
        assert!(!frame_num_le(2, 0x3FFE));
    }

    #[test]
    fn test_last_microframe() {
        assert_eq!(last_microframe(0x10), 0x17);
        assert_eq!(last_microframe(0x17), 0x17);
        assert_eq!(last_microframe(HFNUM_MAX_FRNUM), HFNUM_MAX_FRNUM);
    }
}
