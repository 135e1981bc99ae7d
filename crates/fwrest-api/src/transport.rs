//! Request bodies as seen by the core
//!
//! hyper delivers a body as a stream of frames. The first frame plays the
//! part of the bytes buffered with the request head; later frames are pulled
//! through [`BodyTransport::recv`] on demand, so nothing beyond one frame is
//! held in memory.

use async_trait::async_trait;
use axum::body::{Body, BodyDataStream};
use bytes::{Buf, Bytes};
use futures::StreamExt;
use fwrest_core::{BodyTransport, CoreError, CoreResult, RequestHead, StreamCursor, TransportError};

/// Receive size advertised to the core, one TCP segment
pub const RECV_CHUNK: usize = 1460;

/// Body of one inbound request
pub struct HttpBody {
    frames: BodyDataStream,
    leftover: Bytes,
    finished: bool,
}

impl HttpBody {
    pub fn new(body: Body) -> Self {
        Self {
            frames: body.into_data_stream(),
            leftover: Bytes::new(),
            finished: false,
        }
    }

    /// Take the first non-empty frame.
    ///
    /// Returns an empty slice for bodies without data.
    pub async fn prebuffer(&mut self) -> Result<Bytes, TransportError> {
        if !self.leftover.is_empty() {
            return Ok(std::mem::take(&mut self.leftover));
        }
        while !self.finished {
            match self.frames.next().await {
                Some(Ok(frame)) if frame.is_empty() => continue,
                Some(Ok(frame)) => return Ok(frame),
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => self.finished = true,
            }
        }
        Ok(Bytes::new())
    }
}

#[async_trait]
impl BodyTransport for HttpBody {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        while self.leftover.is_empty() {
            if self.finished {
                return Ok(0);
            }
            match self.frames.next().await {
                Some(Ok(frame)) => self.leftover = frame,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => self.finished = true,
            }
        }

        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.advance(n);
        Ok(n)
    }

    fn max_chunk(&self) -> usize {
        RECV_CHUNK
    }
}

/// A routed request: head, path parameter and the unread body
pub struct DeviceRequest {
    pub head: RequestHead,
    /// Path remainder after the matched route prefix
    pub param: String,
    pub body: HttpBody,
}

impl DeviceRequest {
    pub fn new(head: RequestHead, param: impl Into<String>, body: Body) -> Self {
        Self {
            head,
            param: param.into(),
            body: HttpBody::new(body),
        }
    }

    /// Open the body as a [`StreamCursor`]
    pub async fn cursor(&mut self) -> CoreResult<StreamCursor<'_, HttpBody>> {
        let prebuffered = self
            .body
            .prebuffer()
            .await
            .map_err(|e| CoreError::Io(e.to_string()))?;
        StreamCursor::new(self.head.content_length, prebuffered, &mut self.body)
    }

    /// Read a small body completely, as text
    pub async fn text(&mut self, limit: usize) -> CoreResult<String> {
        let body = self.cursor().await?.collect(limit).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
