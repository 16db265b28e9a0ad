//! # RLE Encoding Scheme
//!
//! ```text
//!          byte 0      byte 1
//!        ┌─────────┬─────────┐
//!        │  count  │  value  │
//!        └─────────┴─────────┘
//!         1..=255    any u8
//! ```
//!
//! Every run of identical bytes is written as one or more 2 byte elements.
//! A run longer than 255 bytes is cut into elements of 255, followed by the
//! remainder. A lone byte costs a whole element, so in the worst case the
//! encoded data is twice the size of the input.
//!
//! A count of 0 is never produced and is rejected by the decoder.
//!
//! The encoding does not include the size.
//! There is no header, length prefix or trailer: the stream ends where the
//! underlying container ends.
//!
//! # Streaming Scheme
//!
//! [`RleEncoder`] wraps any [`std::io::Write`] sink. Input may arrive in
//! chunks of any size; a run that is still open at the end of a chunk is held
//! back until the next chunk (or [`RleEncoder::finalize`]) decides where it
//! ends. Encoded elements are collected in a buffer of [`BUF_SIZE`] bytes owned
//! by the encoder and handed to the sink when it fills up.
//!
//! [`RleDecoder`] wraps any [`std::io::Read`] source. It pulls encoded bytes
//! in increments of at most [`BUF_SIZE`], and keeps an odd trailing byte or a
//! partially delivered run around for the next read.
//!
//! Chunking never changes the output: feeding the same bytes through the
//! encoder in any split produces the same encoded stream as
//! [`codec::encode_to_vec`].

#[macro_use]
extern crate log;

pub mod codec;
mod derle;
mod error;
mod rle;

pub use codec::{calc_size, decode, decode_to_vec, encode, encode_to_vec, Element, Progress};
pub use derle::RleDecoder;
pub use error::{Malformed, Result, RleError};
pub use rle::RleEncoder;

/// longest run a single element can carry
pub const MAX_RUN: usize = u8::MAX as usize;
/// encoded size of one element
pub const ELEMENT_LEN: usize = 2;
/// size of the buffer owned by each streaming encoder/decoder
pub const BUF_SIZE: usize = 256;
