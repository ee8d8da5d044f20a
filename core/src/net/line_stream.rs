/*
 * line_stream.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postern, a SASL client and secure connection library.
 *
 * Postern is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postern is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postern.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Write-side buffering that hands complete CRLF-terminated lines to the inner stream.
//!
//! After every `write` the buffer holds no CRLF: everything up to the last line terminator has
//! been passed on in a single write, and only a trailing partial line is retained.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_CAPACITY: usize = 1024;
const MIN_CAPACITY: usize = 16;

pub struct LineStream<S> {
    inner: S,
    buf: BytesMut,
    capacity: usize,
}

/// End index (exclusive) of the last CRLF in `buf`.
fn last_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).rposition(|w| w == b"\r\n").map(|i| i + 2)
}

impl<S: AsyncWrite + Unpin> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self { inner, buf: BytesMut::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written but not yet passed to the inner stream.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the inner stream. Pending bytes are discarded; flush first.
    pub fn into_inner(self) -> S {
        self.inner
    }

    pub async fn write(&mut self, mut data: &[u8]) -> io::Result<()> {
        if self.buf.len() + data.len() > self.capacity {
            self.flush_buffer().await?;
            while data.len() > self.capacity {
                let (chunk, rest) = data.split_at(self.capacity);
                self.inner.write_all(chunk).await?;
                data = rest;
            }
        }
        self.buf.extend_from_slice(data);
        if let Some(end) = last_line_end(&self.buf) {
            let lines = self.buf.split_to(end);
            self.inner.write_all(&lines).await?;
        }
        Ok(())
    }

    /// Relay everything `source` yields through the buffer. Returns the number of bytes read.
    pub async fn write_from<R>(&mut self, source: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.flush_buffer().await?;
        let mut chunk = vec![0u8; self.capacity];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
            self.write(&chunk[..n]).await?;
        }
    }

    /// Pass any buffered bytes to the inner stream. Nothing buffered means nothing happens.
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.flush_buffer().await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.flush().await?;
        self.inner.shutdown().await
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Records each write call the line stream makes.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl AsyncWrite for Recorder {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn line_written_once() {
        let mut s = LineStream::new(Recorder::default());
        s.write(b"ABC").await.unwrap();
        assert!(s.get_ref().writes.is_empty());
        s.write(b"DEF\r\n").await.unwrap();
        assert_eq!(s.get_ref().writes, vec![b"ABCDEF\r\n".to_vec()]);
        assert_eq!(s.buffered(), 0);
    }

    #[tokio::test]
    async fn partial_line_retained_until_flush() {
        let mut s = LineStream::new(Recorder::default());
        s.write(b"A1 LOGIN\r\nA2 NO").await.unwrap();
        assert_eq!(s.get_ref().writes, vec![b"A1 LOGIN\r\n".to_vec()]);
        assert_eq!(s.buffered(), 5);
        s.flush().await.unwrap();
        assert_eq!(s.get_ref().writes[1], b"A2 NO".to_vec());
        assert_eq!(s.get_ref().flushes, 1);
    }

    #[tokio::test]
    async fn terminator_split_across_writes() {
        let mut s = LineStream::new(Recorder::default());
        s.write(b"X\r").await.unwrap();
        s.write(b"\nY").await.unwrap();
        assert_eq!(s.get_ref().writes, vec![b"X\r\n".to_vec()]);
        assert_eq!(s.buffered(), 1);
    }

    #[tokio::test]
    async fn oversized_write_goes_in_chunks() {
        let mut s = LineStream::with_capacity(Recorder::default(), 16);
        s.write(b"ab").await.unwrap();
        s.write(&[b'x'; 40]).await.unwrap();
        let writes = &s.get_ref().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], b"ab".to_vec());
        assert_eq!(writes[1].len(), 16);
        assert_eq!(writes[2].len(), 16);
        assert_eq!(s.buffered(), 8);
    }

    #[tokio::test]
    async fn empty_flush_is_noop() {
        let mut s = LineStream::new(Recorder::default());
        s.flush().await.unwrap();
        assert!(s.get_ref().writes.is_empty());
        assert_eq!(s.get_ref().flushes, 0);
    }

    #[tokio::test]
    async fn relays_source_stream() {
        let mut s = LineStream::with_capacity(Recorder::default(), 1);
        assert_eq!(s.capacity(), MIN_CAPACITY);
        s.write(b"pending").await.unwrap();
        let mut source: &[u8] = b"LINE1\r\nLINE2";
        let n = s.write_from(&mut source).await.unwrap();
        assert_eq!(n, 12);
        assert_eq!(s.get_ref().writes, vec![b"pending".to_vec(), b"LINE1\r\n".to_vec()]);
        assert_eq!(s.buffered(), 5);
    }
}
