use crate::codec::{self, Element};
use crate::error::{Result, RleError};
use crate::{BUF_SIZE, ELEMENT_LEN, MAX_RUN};
use std::io;

/// Streaming encoder over any [`io::Write`] sink.
///
/// Bytes can be pushed in chunks of any size. The run that is still open at
/// the end of a chunk is held back, so the encoded stream does not depend on
/// how the input was split. Call [`RleEncoder::finalize`] once at the end,
/// otherwise the last run never reaches the sink.
pub struct RleEncoder<W> {
    pending: Option<Element>,
    buf: [u8; BUF_SIZE],
    /// `buf[sent..len]` is encoded but not yet accepted by the sink
    sent: usize,
    len: usize,
    deferred: Option<io::Error>,
    closed: bool,
    writer: W,
}

impl<W: io::Write> RleEncoder<W> {
    pub fn new(writer: W) -> Self {
        RleEncoder {
            pending: None,
            buf: [0; BUF_SIZE],
            sent: 0,
            len: 0,
            deferred: None,
            closed: false,
            writer,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Mutable access to the sink, e.g. to repair it after a failed write.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the sink without finalizing; an open run is dropped.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Encodes `buf` and returns how many bytes were accepted, which is all
    /// of them unless the sink fails.
    ///
    /// On [`RleError::Sink`], `accepted` bytes are part of the encoder state.
    /// Retrying with the rest of `buf` continues the stream without gaps or
    /// duplicates.
    pub fn push(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(RleError::StreamClosed);
        }
        if let Some(source) = self.deferred.take() {
            return Err(RleError::Sink {
                accepted: 0,
                source,
            });
        }
        let sink_err = |accepted| move |source| RleError::Sink { accepted, source };

        let mut accepted = 0;
        if let Some(mut run) = self.pending {
            accepted = buf
                .iter()
                .take(MAX_RUN - run.count as usize)
                .take_while(|byte| **byte == run.value)
                .count();
            run.count += accepted as u8;
            self.pending = Some(run);
            trace!("extend {run:?} by {accepted}");
            if accepted == buf.len() && (run.count as usize) < MAX_RUN {
                return Ok(buf.len());
            }
            self.emit(run).map_err(sink_err(accepted))?;
            self.pending = None;
        }

        let rest = &buf[accepted..];
        let tail = match rest.last() {
            Some(last) => rest.iter().rev().take_while(|byte| *byte == last).count() % MAX_RUN,
            None => 0,
        };
        let body_end = buf.len() - tail;
        while accepted < body_end {
            if BUF_SIZE - self.len < ELEMENT_LEN {
                self.drain().map_err(sink_err(accepted))?;
            }
            let progress = codec::encode(&buf[accepted..body_end], &mut self.buf[self.len..]);
            self.len += progress.produced;
            accepted += progress.consumed;
        }

        if tail > 0 {
            let run = Element {
                count: tail as u8,
                value: buf[body_end],
            };
            trace!("hold {run:?}");
            self.pending = Some(run);
        }
        Ok(buf.len())
    }

    /// Emits the open run and hands everything to the sink.
    ///
    /// After this succeeds the stream is complete and any further
    /// [`push`](Self::push) or `finalize` fails with
    /// [`RleError::StreamClosed`]. A failed finalize can be retried.
    pub fn finalize(&mut self) -> Result<()> {
        if self.closed {
            return Err(RleError::StreamClosed);
        }
        let sink_err = |source| RleError::Sink {
            accepted: 0,
            source,
        };
        if let Some(source) = self.deferred.take() {
            return Err(sink_err(source));
        }
        if let Some(run) = self.pending {
            trace!("last run: {run:?}");
            self.emit(run).map_err(sink_err)?;
            self.pending = None;
        }
        self.drain().map_err(sink_err)?;
        self.writer.flush().map_err(sink_err)?;
        self.closed = true;
        debug!("rle stream finalized");
        Ok(())
    }

    /// [`finalize`](Self::finalize) and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.finalize()?;
        Ok(self.writer)
    }

    #[inline(always)]
    fn emit(&mut self, element: Element) -> io::Result<()> {
        if BUF_SIZE - self.len < ELEMENT_LEN {
            self.drain()?;
        }
        self.buf[self.len..self.len + ELEMENT_LEN].copy_from_slice(&element.to_bytes());
        self.len += ELEMENT_LEN;
        Ok(())
    }

    /// Writes out `buf[sent..len]`. Progress survives a failure part way.
    fn drain(&mut self) -> io::Result<()> {
        while self.sent < self.len {
            match self.writer.write(&self.buf[self.sent..self.len]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no encoded bytes",
                    ))
                }
                Ok(n) => {
                    debug!("sink accepted {n} of {} bytes", self.len - self.sent);
                    self.sent += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.sent = 0;
        self.len = 0;
        Ok(())
    }
}

impl<W: io::Write> io::Write for RleEncoder<W> {
    /// A sink failure after some input was accepted is reported as a short
    /// write; the error itself is returned by the next call.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.push(buf) {
            Ok(n) => Ok(n),
            Err(RleError::Sink { accepted, source }) if accepted > 0 => {
                warn!("sink failed after {accepted} bytes: {source}");
                self.deferred = Some(source);
                Ok(accepted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Hands all complete elements to the sink. The open run stays pending.
    fn flush(&mut self) -> io::Result<()> {
        if let Some(source) = self.deferred.take() {
            return Err(source);
        }
        self.drain()?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::RleEncoder;
    use crate::{encode_to_vec, RleError};
    use proptest::prelude::*;
    use std::io::{self, Write};
    use std::sync::Once;

    const TEST_VECTOR: [(&[&str], &str); 6] = [
        (&["0101", "01", "0202"], "03010202"),
        (&["", "aa", "", "aa"], "02aa"),
        (&["010203"], "010101020103"),
        (&["01", "02", "03"], "010101020103"),
        (&["ffff00", "00ff"], "02ff020001ff"),
        (&["", ""], ""),
    ];

    static INIT: Once = Once::new();

    /// Setup function that is only run once, even if called multiple times.
    fn setup() {
        INIT.call_once(|| {
            let _ = pretty_env_logger::try_init();
        });
    }

    /// Records every write; fails on the `fail_on`-th call and accepts at
    /// most `max_write` bytes per call.
    struct FlakySink {
        out: Vec<u8>,
        calls: usize,
        fail_on: Option<usize>,
        max_write: usize,
    }

    impl FlakySink {
        fn new(fail_on: Option<usize>, max_write: usize) -> Self {
            FlakySink {
                out: vec![],
                calls: 0,
                fail_on,
                max_write,
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.fail_on == Some(self.calls) {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "sink down"));
            }
            let n = buf.len().min(self.max_write);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Pushes `input` in `chunk` sized pieces, repairing the sink whenever it
    /// fails and retrying the bytes that were not accepted.
    fn push_with_retry(rle: &mut RleEncoder<FlakySink>, input: &[u8], chunk: usize) -> usize {
        let mut failures = 0;
        for piece in input.chunks(chunk) {
            let mut rest = piece;
            loop {
                match rle.push(rest) {
                    Ok(n) => {
                        assert_eq!(n, rest.len());
                        break;
                    }
                    Err(RleError::Sink { accepted, source }) => {
                        assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
                        failures += 1;
                        rest = &rest[accepted..];
                        rle.get_mut().fail_on = None;
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }
        failures
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i / 7) % 5) as u8 ^ ((i / 300) as u8)).collect()
    }

    #[test]
    fn test_rle_encode() {
        setup();
        for (chunks, expected) in TEST_VECTOR.into_iter() {
            let expected = hex::decode(expected).unwrap();
            let mut out = vec![];
            let mut rle = RleEncoder::new(&mut out);
            for chunk in chunks {
                rle.write_all(&hex::decode(chunk).unwrap()).unwrap();
            }
            rle.finalize().unwrap();
            assert_eq!(expected, out);
        }
    }

    #[test]
    fn test_run_boundary_across_writes() {
        setup();
        let mut rle = RleEncoder::new(vec![]);
        rle.push(&[0xAA; 200]).unwrap();
        rle.push(&[0xAA; 55]).unwrap();
        rle.push(&[0xAA]).unwrap();
        let out = rle.finish().unwrap();
        assert_eq!(out, [0xFF, 0xAA, 0x01, 0xAA]);
    }

    #[test]
    fn test_empty_stream_never_writes() {
        setup();
        let mut rle = RleEncoder::new(FlakySink::new(Some(1), usize::MAX));
        rle.push(&[]).unwrap();
        rle.finalize().unwrap();
        assert_eq!(rle.get_ref().calls, 0);
    }

    #[test]
    fn test_write_after_finalize() {
        setup();
        let mut rle = RleEncoder::new(vec![]);
        rle.push(b"abc").unwrap();
        rle.finalize().unwrap();
        assert!(matches!(rle.push(b"d"), Err(RleError::StreamClosed)));
        assert!(matches!(rle.finalize(), Err(RleError::StreamClosed)));
        let err = rle.write(b"d").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(rle.into_inner(), encode_to_vec(b"abc"));
    }

    #[test]
    fn test_flush_keeps_open_run() {
        setup();
        let mut rle = RleEncoder::new(vec![]);
        rle.write_all(&[1, 1, 2, 2, 2]).unwrap();
        rle.flush().unwrap();
        assert_eq!(rle.get_ref(), &[2, 1]);
        rle.write_all(&[2]).unwrap();
        assert_eq!(rle.finish().unwrap(), [2, 1, 4, 2]);
    }

    #[test]
    fn test_short_writes() {
        setup();
        let input = pattern(4000);
        let mut rle = RleEncoder::new(FlakySink::new(None, 3));
        rle.write_all(&input).unwrap();
        let sink = rle.finish().unwrap();
        assert_eq!(sink.out, encode_to_vec(&input));
    }

    #[test]
    fn test_zero_length_sink_write() {
        setup();
        let mut rle = RleEncoder::new(FlakySink::new(None, 0));
        rle.push(&[7]).unwrap();
        match rle.finalize() {
            Err(RleError::Sink { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::WriteZero)
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // the element is still buffered
        rle.get_mut().max_write = usize::MAX;
        rle.finalize().unwrap();
        assert_eq!(rle.get_ref().out, [1, 7]);
    }

    #[test]
    fn test_sink_failure_is_resumable() {
        setup();
        let input = pattern(5000);
        for fail_on in 1..8 {
            let mut rle = RleEncoder::new(FlakySink::new(Some(fail_on), 100));
            let failures = push_with_retry(&mut rle, &input, 333);
            assert_eq!(failures, 1);
            let sink = rle.finish().unwrap();
            assert_eq!(sink.out, encode_to_vec(&input), "fail_on={fail_on}");
        }
    }

    #[test]
    fn test_failed_finalize_is_retryable() {
        setup();
        let input = pattern(700);
        let mut rle = RleEncoder::new(FlakySink::new(None, usize::MAX));
        rle.push(&input).unwrap();
        let calls = rle.get_ref().calls;
        rle.get_mut().fail_on = Some(calls + 1);
        assert!(matches!(rle.finalize(), Err(RleError::Sink { .. })));
        rle.get_mut().fail_on = None;
        let sink = rle.finish().unwrap();
        assert_eq!(sink.out, encode_to_vec(&input));
    }

    #[test]
    fn test_io_write_defers_sink_error() {
        setup();
        let input = pattern(2000);
        let mut rle = RleEncoder::new(FlakySink::new(Some(2), usize::MAX));
        let n = rle.write(&input).unwrap();
        assert!(n > 0 && n < input.len());
        let err = rle.write(&input[n..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        rle.write_all(&input[n..]).unwrap();
        let sink = rle.finish().unwrap();
        assert_eq!(sink.out, encode_to_vec(&input));
    }

    proptest! {
        #[test]
        fn prop_sink_failure_non_corruption(
            input in proptest::collection::vec(0u8..3, 0..3000),
            chunk in 1usize..500,
            fail_on in 1usize..20,
            max_write in 1usize..300,
        ) {
            let mut rle = RleEncoder::new(FlakySink::new(Some(fail_on), max_write));
            push_with_retry(&mut rle, &input, chunk);
            let sink = loop {
                match rle.finalize() {
                    Ok(()) => break rle.into_inner(),
                    Err(RleError::Sink { .. }) => rle.get_mut().fail_on = None,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            };
            prop_assert_eq!(sink.out, encode_to_vec(&input));
        }
    }
}
