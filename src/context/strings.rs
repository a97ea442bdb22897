//! String transcoding into fixed-size script buffers
//!
//! Both copies treat the source as a C string (stop at the first NUL) and
//! always terminate the destination when it has room for at least one byte.

/// Source bytes up to (not including) the first NUL
#[inline]
pub fn c_str_bytes(src: &[u8]) -> &[u8] {
    match src.iter().position(|&b| b == 0) {
        Some(end) => &src[..end],
        None => src,
    }
}

/// Byte-wise copy with plain truncation; returns bytes written excluding NUL
pub fn copy_ascii(dest: &mut [u8], src: &[u8]) -> usize {
    let Some(room) = dest.len().checked_sub(1) else {
        return 0;
    };
    let src = c_str_bytes(src);
    let len = src.len().min(room);

    dest[..len].copy_from_slice(&src[..len]);
    dest[len] = 0;
    len
}

/// Copy that never cuts a UTF-8 sequence in half; returns bytes written excluding NUL
pub fn copy_utf8(dest: &mut [u8], src: &[u8]) -> usize {
    let Some(room) = dest.len().checked_sub(1) else {
        return 0;
    };
    let src = c_str_bytes(src);
    let len = utf8_cut(src, room);

    dest[..len].copy_from_slice(&src[..len]);
    dest[len] = 0;
    len
}

/// Largest prefix length `<= max` that ends on a sequence boundary
pub fn utf8_cut(src: &[u8], max: usize) -> usize {
    if src.len() <= max {
        return src.len();
    }
    let mut len = max;
    while len > 0 && is_continuation(src[len]) {
        len -= 1;
    }
    len
}

/// Trim `text` to at most `max` bytes without splitting a character
pub fn truncate_str(text: &str, max: usize) -> &str {
    &text[..utf8_cut(text.as_bytes(), max)]
}

#[inline]
const fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}
