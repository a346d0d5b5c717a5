/// Split `content` into consecutive slices of at most `max_size` bytes.
///
/// Only the last slice may be shorter. Empty input yields no slices and an
/// exact multiple of `max_size` yields no trailing empty slice.
///
/// # Panics
///
/// Panics if `max_size` is zero.
pub fn chunk(content: &[u8], max_size: usize) -> Vec<&[u8]> {
    assert!(max_size > 0, "chunk size must be non-zero");
    content.chunks(max_size).collect()
}
