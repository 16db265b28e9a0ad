use crate::codec::{self, Element};
use crate::error::{Malformed, Result, RleError};
use crate::{BUF_SIZE, ELEMENT_LEN};
use std::io;

/// Streaming decoder over any [`io::Read`] source.
pub struct RleDecoder<R> {
    /// `buf[start..end]` is encoded input not decoded yet
    buf: [u8; BUF_SIZE],
    start: usize,
    end: usize,
    /// stream offset of `buf[start]`
    offset: u64,
    expansion: Option<Expansion>,
    deferred: Option<io::Error>,
    reader: R,
}

/// A decoded run that did not fit into the previous destination.
#[derive(Debug, Clone, Copy)]
struct Expansion {
    value: u8,
    remaining: u32,
}

impl<R: io::Read> RleDecoder<R> {
    pub fn new(reader: R) -> Self {
        RleDecoder {
            buf: [0; BUF_SIZE],
            start: 0,
            end: 0,
            offset: 0,
            expansion: None,
            deferred: None,
            reader,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decodes up to `max` bytes. An empty result means end of stream.
    ///
    /// The result grows as output is decoded, so `max` may be far larger
    /// than the stream.
    pub fn pull(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut scratch = [0; BUF_SIZE];
        while out.len() < max {
            let want = (max - out.len()).min(BUF_SIZE);
            match self.pull_into(&mut scratch[..want]) {
                Ok(n) => {
                    out.extend_from_slice(&scratch[..n]);
                    if n < want {
                        break;
                    }
                }
                Err(RleError::Source { produced, source }) if produced > 0 || !out.is_empty() => {
                    warn!("source failed after {} bytes: {source}", out.len() + produced);
                    out.extend_from_slice(&scratch[..produced]);
                    self.deferred = Some(source);
                    break;
                }
                // the decoder stays in front of the bad input, so the next call reports it
                Err(err) if err.is_malformed() && !out.is_empty() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Fills `dest` with decoded bytes and returns how many were written.
    ///
    /// Less than `dest.len()` is returned only at the end of the encoded
    /// stream or in front of a malformed element, and `Ok(0)` only once
    /// nothing is left. Malformed or truncated input is reported by the
    /// first call that cannot produce anything. On
    /// [`RleError::Source`], `dest[..produced]` holds valid output and the
    /// next call continues right after it.
    pub fn pull_into(&mut self, dest: &mut [u8]) -> Result<usize> {
        if let Some(source) = self.deferred.take() {
            return Err(RleError::Source {
                produced: 0,
                source,
            });
        }

        let mut produced = 0;
        while produced < dest.len() {
            if let Some(expansion) = self.expansion.as_mut() {
                let take = (expansion.remaining as usize).min(dest.len() - produced);
                dest[produced..produced + take].fill(expansion.value);
                produced += take;
                expansion.remaining -= take as u32;
                trace!("expand {take}, {} left", expansion.remaining);
                if expansion.remaining == 0 {
                    self.expansion = None;
                }
                continue;
            }

            let whole = (self.end - self.start) / ELEMENT_LEN * ELEMENT_LEN;
            if whole > 0 {
                let src = &self.buf[self.start..self.start + whole];
                let base = self.offset;
                let progress = match codec::decode(src, &mut dest[produced..]) {
                    Ok(progress) => progress,
                    Err(RleError::MalformedInput { offset, kind }) => {
                        let valid = offset as usize;
                        if valid == 0 {
                            if produced > 0 {
                                // deliver the output first, the next call fails here
                                break;
                            }
                            return Err(RleError::MalformedInput {
                                offset: base + offset,
                                kind,
                            });
                        }
                        codec::decode(&src[..valid], &mut dest[produced..])?
                    }
                    Err(err) => return Err(err),
                };
                let delivered: usize = src[..progress.consumed]
                    .chunks_exact(ELEMENT_LEN)
                    .map(|element| element[0] as usize)
                    .sum();
                let partial = progress.produced - delivered;
                produced += progress.produced;
                self.advance(progress.consumed);

                if partial > 0 {
                    let head = [self.buf[self.start], self.buf[self.start + 1]];
                    // decode already rejected zero counts
                    if let Some(Element { count, value }) = Element::from_bytes(head) {
                        let expansion = Expansion {
                            value,
                            remaining: (count as usize - partial) as u32,
                        };
                        trace!("carry {expansion:?}");
                        self.expansion = Some(expansion);
                    }
                    self.advance(ELEMENT_LEN);
                }
                continue;
            }

            match self.fill() {
                Ok(0) if self.start == self.end => break,
                Ok(0) if produced > 0 => break,
                Ok(0) => {
                    let offset = self.offset;
                    return Err(if self.buf[self.start] == 0 {
                        RleError::MalformedInput {
                            offset,
                            kind: Malformed::ZeroCount,
                        }
                    } else {
                        RleError::TruncatedStream { offset }
                    });
                }
                Ok(_) => {}
                Err(source) => return Err(RleError::Source { produced, source }),
            }
        }
        Ok(produced)
    }

    #[inline(always)]
    fn advance(&mut self, n: usize) {
        self.start += n;
        self.offset += n as u64;
    }

    /// Moves the leftover byte to the front and reads more input after it.
    fn fill(&mut self) -> io::Result<usize> {
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
        loop {
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    debug!("source delivered {n} bytes");
                    self.end += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: io::Read> io::Read for RleDecoder<R> {
    /// A source failure after some output was produced is reported as a
    /// short read; the error itself is returned by the next call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.pull_into(buf) {
            Ok(n) => Ok(n),
            Err(RleError::Source { produced, source }) if produced > 0 => {
                warn!("source failed after {produced} bytes: {source}");
                self.deferred = Some(source);
                Ok(produced)
            }
            Err(e) => Err(e.into()),
        }
    }
}
