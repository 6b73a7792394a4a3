//! Partial window selection.
//!
//! A partial decode only ever sees the trailing `W` bytes of the utterance so its
//! cost stays flat no matter how long the learner keeps talking. Finals always
//! decode the whole buffer and never go through here.

/// Return the trailing `window_bytes` of `buffer`, or all of it when it is not longer.
///
/// Pure size transform: the result borrows from `buffer` and nothing is copied.
///
/// ## Example:
/// ```rust
/// let buffer = [1u8, 2, 3, 4, 5, 6];
/// assert_eq!(select_partial_window(&buffer, 4), &[3, 4, 5, 6]);
/// assert_eq!(select_partial_window(&buffer, 10), &buffer);
/// ```
pub fn select_partial_window(buffer: &[u8], window_bytes: usize) -> &[u8] {
    if buffer.len() > window_bytes {
        &buffer[buffer.len() - window_bytes..]
    } else {
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_long_buffer_returns_exact_tail() {
        let window = 64000;
        for len in [window + 1, window + 2, 3 * window + 17] {
            let buffer = ramp(len);
            let selected = select_partial_window(&buffer, window);

            assert_eq!(selected.len(), window);
            assert_eq!(selected, &buffer[len - window..]);
        }
    }

    #[test]
    fn test_short_buffer_is_returned_unchanged() {
        let window = 64000;
        for len in [0, 1, 8000, window] {
            let buffer = ramp(len);
            assert_eq!(select_partial_window(&buffer, window), buffer.as_slice());
        }
    }

    #[test]
    fn test_window_does_not_mutate_source() {
        let buffer = ramp(100);
        let before = buffer.clone();
        let _ = select_partial_window(&buffer, 10);
        assert_eq!(buffer, before);
    }
}
