pub mod types;

use types::Delimiter;

lazy_static! {
    static ref BODY_DELIM: Delimiter = Delimiter::new(b"\r\n\r\n").expect("static delimiter");
}

/// Offset just past the first blank line (`\r\n\r\n`) in `buffer` that
/// begins at or after `start`.
pub fn find_body_start_from(buffer: &[u8], start: usize) -> Option<usize> {
    BODY_DELIM.find_from(buffer, start).map(|idx| idx + BODY_DELIM.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_terminator() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody";
        assert_eq!(find_body_start_from(buf, 0), Some(buf.len() - 4));
    }

    #[test]
    fn no_terminator() {
        assert_eq!(find_body_start_from(b"GET / HTTP/1.1\r\nHost: x\r\n", 0), None);
        assert_eq!(find_body_start_from(b"", 0), None);
    }

    #[test]
    fn resumes_from_offset() {
        let buf = b"a\r\n\r\nb\r\n\r\n";
        assert_eq!(find_body_start_from(buf, 0), Some(5));
        assert_eq!(find_body_start_from(buf, 2), Some(10));
    }

    #[test]
    fn delimiter_matches_binary_bytes() {
        let delim = Delimiter::new(b"--X").unwrap();
        let hay = [0u8, 0xff, b'-', b'-', b'X', 0x00];
        assert_eq!(delim.find_from(&hay, 0), Some(2));
        assert_eq!(delim.find_from(&hay, 3), None);
        assert_eq!(delim.len(), 3);
    }
}
