//! Pull-based request body source
//!
//! A request body reaches a handler in two parts: whatever the transport
//! already buffered together with the request head, and the bytes still on
//! the socket. [`StreamCursor`] merges both behind a single `pull` and keeps
//! the one counter that matters, the number of bytes still owed according to
//! the declared content length.
//!
//! Termination rules:
//!
//! - `remaining == 0`: the body is complete, `pull` returns `None` without
//!   touching the transport.
//! - A short read is returned as-is; the caller loops.
//! - A transport error while bytes are owed is terminal ([`CoreError::Io`]).
//! - The peer closing the connection while bytes are owed is terminal as
//!   well, otherwise the caller would spin on zero-length reads.

use bytes::Bytes;

use crate::device::BodyTransport;
use crate::error::{CoreError, CoreResult};

/// Cursor over one request body
pub struct StreamCursor<'t, T: BodyTransport + ?Sized> {
    transport: &'t mut T,
    /// Unconsumed part of the pre-buffered slice
    prebuffered: Bytes,
    /// Chunk most recently handed out from the pre-buffered slice
    current: Bytes,
    /// Bytes still owed per the declared length
    remaining: i64,
    delivered: u64,
    recv_buf: Vec<u8>,
}

impl<'t, T: BodyTransport + ?Sized> StreamCursor<'t, T> {
    /// Build a cursor from the declared length (`-1` when unknown), the bytes
    /// buffered with the head, and the transport holding the rest.
    ///
    /// With an unknown length the body is exactly the pre-buffered bytes.
    pub fn new(content_length: i64, prebuffered: Bytes, transport: &'t mut T) -> CoreResult<Self> {
        let buffered = i64::try_from(prebuffered.len())
            .map_err(|_| CoreError::Parse("pre-buffered body too large".to_string()))?;
        let remaining = if content_length >= 0 {
            content_length
        } else {
            buffered
        };

        if buffered > remaining {
            return Err(CoreError::Parse(format!(
                "{} body bytes buffered but only {} declared",
                buffered, remaining
            )));
        }

        let recv_size = transport.max_chunk().max(1);
        Ok(Self {
            transport,
            prebuffered,
            current: Bytes::new(),
            remaining,
            delivered: 0,
            recv_buf: vec![0u8; recv_size],
        })
    }

    /// Bytes still owed by the body
    pub fn remaining(&self) -> u64 {
        self.remaining.max(0) as u64
    }

    /// Bytes handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Pull the next chunk of at most `max` bytes.
    ///
    /// Returns `Ok(None)` once the declared length has been delivered.
    pub async fn pull(&mut self, max: usize) -> CoreResult<Option<&[u8]>> {
        if self.remaining < 0 {
            return Err(CoreError::Parse(format!(
                "body overran its declared length by {} bytes",
                -self.remaining
            )));
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        let max = max.max(1);

        if !self.prebuffered.is_empty() {
            let take = max.min(self.prebuffered.len());
            self.current = self.prebuffered.split_to(take);
            self.consume(take)?;
            return Ok(Some(&self.current[..]));
        }

        let want = max
            .min(self.recv_buf.len())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));

        match self.transport.recv(&mut self.recv_buf[..want]).await {
            Ok(0) => Err(CoreError::Io(format!(
                "connection closed with {} bytes outstanding",
                self.remaining
            ))),
            Ok(n) => {
                self.consume(n)?;
                Ok(Some(&self.recv_buf[..n]))
            }
            Err(e) => {
                tracing::debug!(
                    remaining = self.remaining,
                    delivered = self.delivered,
                    error = %e,
                    "recv failed mid-body"
                );
                Err(CoreError::Io(format!(
                    "recv failed with {} bytes outstanding: {}",
                    self.remaining, e
                )))
            }
        }
    }

    /// Drain the whole body into memory, refusing bodies over `limit` bytes.
    ///
    /// Meant for small JSON and command payloads, never for images.
    pub async fn collect(&mut self, limit: usize) -> CoreResult<Vec<u8>> {
        if self.remaining() > limit as u64 {
            return Err(CoreError::Parse(format!(
                "body of {} bytes exceeds limit of {}",
                self.remaining(),
                limit
            )));
        }

        let mut body = Vec::with_capacity(self.remaining() as usize);
        while let Some(chunk) = self.pull(limit).await? {
            body.extend_from_slice(chunk);
        }
        Ok(body)
    }

    fn consume(&mut self, n: usize) -> CoreResult<()> {
        let n = i64::try_from(n).map_err(|_| CoreError::Io("chunk too large".to_string()))?;
        let left = self.remaining - n;
        if left < 0 {
            self.remaining = left;
            return Err(CoreError::Parse(format!(
                "received {} bytes with only {} outstanding",
                n,
                left + n
            )));
        }
        self.remaining = left;
        self.delivered += n as u64;
        Ok(())
    }
}
