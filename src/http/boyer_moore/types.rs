use core::slice::Iter;

use boyer_moore_magiclen::{BMByte, BMByteSearchable};

pub struct BMBuf<'a>(pub &'a [u8]);

impl BMByteSearchable for BMBuf<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    fn value_at(&self, index: usize) -> u8 {
        self.0[index]
    }

    #[inline]
    fn iter(&self) -> Iter<u8> {
        self.0.iter()
    }
}

/// A precompiled byte pattern, e.g. a multipart delimiter.
pub struct Delimiter {
    searcher: BMByte,
    len: usize,
}

impl Delimiter {
    pub fn new(pattern: &[u8]) -> Option<Delimiter> {
        let searcher = BMByte::from(BMBuf(pattern))?;
        Some(Delimiter {
            searcher,
            len: pattern.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Index of the first match at or after `start`.
    pub fn find_from(&self, haystack: &[u8], start: usize) -> Option<usize> {
        if start >= haystack.len() {
            return None;
        }
        let vec = self.searcher.find_in(BMBuf(&haystack[start..]), 1);
        vec.first().map(|idx| idx + start)
    }
}
