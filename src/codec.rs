//! Stateless block codec.
//!
//! All functions work on whole buffers and keep no state between calls. The
//! bounded forms ([`encode`], [`decode`]) stop when the destination is full
//! and report how far they got, so a caller can resume with the unconsumed
//! tail of the source.

use crate::error::{Malformed, Result, RleError};
use crate::{ELEMENT_LEN, MAX_RUN};

/// One `(count, value)` pair on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub count: u8,
    pub value: u8,
}

impl Element {
    #[inline(always)]
    pub fn to_bytes(self) -> [u8; ELEMENT_LEN] {
        [self.count, self.value]
    }

    /// `None` for a zero count, which never appears in a valid stream.
    #[inline(always)]
    pub fn from_bytes(bytes: [u8; ELEMENT_LEN]) -> Option<Element> {
        match bytes {
            [0, _] => None,
            [count, value] => Some(Element { count, value }),
        }
    }
}

/// How much of the source a bounded call consumed and how much it wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub consumed: usize,
    pub produced: usize,
}

/// Splits a buffer into elements: maximal runs, cut every [`MAX_RUN`] bytes.
struct Runs<'a> {
    src: &'a [u8],
}

impl Iterator for Runs<'_> {
    type Item = Element;

    #[inline(always)]
    fn next(&mut self) -> Option<Element> {
        let (&value, rest) = self.src.split_first()?;
        let count = 1 + rest
            .iter()
            .take(MAX_RUN - 1)
            .take_while(|byte| **byte == value)
            .count();
        self.src = &self.src[count..];
        Some(Element {
            count: count as u8,
            value,
        })
    }
}

fn runs(src: &[u8]) -> Runs<'_> {
    Runs { src }
}

/// Encodes as many whole elements of `src` as fit into `dest`.
///
/// `consumed` always ends on an element boundary, so encoding
/// `&src[consumed..]` afterwards continues the exact same element stream.
pub fn encode(src: &[u8], dest: &mut [u8]) -> Progress {
    let mut progress = Progress::default();
    for (element, slot) in runs(src).zip(dest.chunks_exact_mut(ELEMENT_LEN)) {
        trace!("encode {element:?}");
        slot.copy_from_slice(&element.to_bytes());
        progress.consumed += element.count as usize;
        progress.produced += ELEMENT_LEN;
    }
    progress
}

/// Encodes the whole of `src`.
pub fn encode_to_vec(src: &[u8]) -> Vec<u8> {
    let mut out = vec![0; calc_size(src)];
    let progress = encode(src, &mut out);
    debug_assert_eq!(progress.consumed, src.len());
    debug_assert_eq!(progress.produced, out.len());
    out
}

/// Number of bytes [`encode_to_vec`] would produce for `src`.
pub fn calc_size(src: &[u8]) -> usize {
    runs(src).count() * ELEMENT_LEN
}

/// Upper bound of the encoded size of `len` input bytes.
pub const fn max_encoded_size(len: usize) -> usize {
    len * ELEMENT_LEN
}

/// Decodes whole elements of `src` into `dest`.
///
/// When an element only partly fits, the bytes that fit are written and
/// counted in `produced`, but the element itself is not counted in
/// `consumed`; the caller has to resume it, skipping what was already
/// delivered.
///
/// A trailing count byte without its value byte is only an error when it is
/// reached with room left in `dest`.
pub fn decode(src: &[u8], dest: &mut [u8]) -> Result<Progress> {
    let mut progress = Progress::default();
    while progress.consumed < src.len() && progress.produced < dest.len() {
        let offset = progress.consumed;
        let count = src[offset] as usize;
        if count == 0 {
            return Err(RleError::MalformedInput {
                offset: offset as u64,
                kind: Malformed::ZeroCount,
            });
        }
        let Some(&value) = src.get(offset + 1) else {
            return Err(RleError::MalformedInput {
                offset: offset as u64,
                kind: Malformed::IncompleteElement,
            });
        };

        let space = dest.len() - progress.produced;
        let take = count.min(space);
        trace!("decode count={count} value=0x{value:02X} take={take}");
        dest[progress.produced..progress.produced + take].fill(value);
        progress.produced += take;
        if take < count {
            break;
        }
        progress.consumed += ELEMENT_LEN;
    }
    Ok(progress)
}

/// Number of bytes `src` decodes to, validating every element on the way.
pub fn decoded_size(src: &[u8]) -> Result<usize> {
    let elements = src.chunks_exact(ELEMENT_LEN);
    if !elements.remainder().is_empty() {
        let offset = src.len() - 1;
        let kind = if src[offset] == 0 {
            Malformed::ZeroCount
        } else {
            Malformed::IncompleteElement
        };
        return Err(RleError::MalformedInput {
            offset: offset as u64,
            kind,
        });
    }
    elements.enumerate().try_fold(0, |size, (i, element)| {
        if element[0] == 0 {
            return Err(RleError::MalformedInput {
                offset: (i * ELEMENT_LEN) as u64,
                kind: Malformed::ZeroCount,
            });
        }
        Ok(size + element[0] as usize)
    })
}

/// Decodes the whole of `src`.
pub fn decode_to_vec(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0; decoded_size(src)?];
    let progress = decode(src, &mut out)?;
    debug_assert_eq!(progress.consumed, src.len());
    Ok(out)
}
