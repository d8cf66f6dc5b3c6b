//! Sanitizing byte-stream transform

use super::sanitize::Sanitizer;
use super::utf8::Utf8Carry;
use crate::backend::BackendError;
use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

type Cancelled = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Applies a [`Sanitizer`] to a streamed body without splitting characters.
///
/// Each chunk goes through a [`Utf8Carry`]; the sanitizer only sees the
/// complete characters decoded so far and the carried tail is flushed
/// through it once at the end. Upstream errors end the stream cleanly after
/// that flush. Dropping the stream drops (and so closes) the upstream.
pub struct SanitizingStream<S> {
    upstream: Option<S>,
    carry: Utf8Carry,
    sanitizer: Arc<dyn Sanitizer>,
    cancelled: Option<Cancelled>,
    _guard: Option<DropGuard>,
    finished: bool,
}

impl<S> SanitizingStream<S>
where
    S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
{
    pub fn new(upstream: S, sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self {
            upstream: Some(upstream),
            carry: Utf8Carry::new(),
            sanitizer,
            cancelled: None,
            _guard: None,
            finished: false,
        }
    }

    /// End the stream (and drop upstream) as soon as `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = Some(Box::pin(token.cancelled_owned()));
        self
    }

    /// Keep `guard` alive for the life of the stream
    pub fn with_drop_guard(mut self, guard: DropGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    fn flush(&mut self) -> Poll<Option<Result<Bytes, Infallible>>> {
        self.finished = true;
        self.upstream = None;
        let tail = self.carry.finish();
        if tail.is_empty() {
            return Poll::Ready(None);
        }
        let clean = self.sanitizer.sanitize(&tail);
        if clean.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Ready(Some(Ok(Bytes::from(clean))))
        }
    }
}

impl<S> Stream for SanitizingStream<S>
where
    S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some(cancelled) = this.cancelled.as_mut() {
                if cancelled.poll_unpin(cx).is_ready() {
                    debug!("Relay cancelled, closing upstream");
                    this.finished = true;
                    this.upstream = None;
                    return Poll::Ready(None);
                }
            }

            let Some(upstream) = this.upstream.as_mut() else {
                return this.flush();
            };

            match upstream.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    let text = this.carry.decode(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    let clean = this.sanitizer.sanitize(&text);
                    if clean.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Bytes::from(clean))));
                }
                Poll::Ready(Some(Err(err))) => {
                    warn!(error = %err, "Upstream stream interrupted");
                    return this.flush();
                }
                Poll::Ready(None) => return this.flush(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{EmojiFilter, Passthrough};
    use futures::stream;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, BackendError>> + Unpin {
        let parts: Vec<_> = parts.iter().map(|p| Ok(Bytes::copy_from_slice(p))).collect();
        stream::iter(parts)
    }

    async fn collect<S>(stream: SanitizingStream<S>) -> String
    where
        S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
    {
        let parts: Vec<Result<Bytes, Infallible>> = stream.collect().await;
        let bytes: Vec<u8> = parts.into_iter().flat_map(|p| p.unwrap_or_default().to_vec()).collect();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_split_character_appears_exactly_once() {
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.len() - 3; // inside é
        let upstream = stream::iter(vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ]);
        let out = collect(SanitizingStream::new(upstream, Arc::new(Passthrough))).await;
        assert_eq!(out, "data: café\n\n");
        assert!(!out.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_split_emoji_is_stripped_not_garbled() {
        let wave = "👋".as_bytes();
        let upstream = chunks(&[b"Hi ".as_slice(), &wave[..2], &wave[2..], b"!"]);
        let out = collect(SanitizingStream::new(upstream, Arc::new(EmojiFilter))).await;
        assert_eq!(out, "Hi !");
    }

    #[tokio::test]
    async fn test_tail_flushed_through_sanitizer_at_end() {
        let upstream = chunks(&[b"ok \xE2\x82".as_slice()]);
        let out = collect(SanitizingStream::new(upstream, Arc::new(|s: &str| s.replace('\u{FFFD}', "?")))).await;
        assert_eq!(out, "ok ?");
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream_cleanly() {
        let euro = "€".as_bytes();
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Ok(Bytes::copy_from_slice(&euro[..1])),
            Err(BackendError::Transport("reset".into())),
            Ok(Bytes::from_static(b"never")),
        ]);
        let out = collect(SanitizingStream::new(upstream, Arc::new(Passthrough))).await;
        assert_eq!(out, "part\u{FFFD}");
    }

    #[tokio::test]
    async fn test_cancellation_drops_upstream() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        struct Flag(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let flag = Flag(dropped.clone());
        let upstream = chunks(&[b"first".as_slice()])
            .chain(stream::pending())
            .map(move |item| {
                let _keep = &flag;
                item
            });

        let token = CancellationToken::new();
        let mut relay =
            SanitizingStream::new(Box::pin(upstream), Arc::new(Passthrough)).with_cancellation(token.clone());
        let first = relay.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"first");

        token.cancel();
        assert!(relay.next().await.is_none());
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_stream_fires_guard() {
        let token = CancellationToken::new();
        let relay = SanitizingStream::new(chunks(&[b"x".as_slice()]), Arc::new(Passthrough))
            .with_drop_guard(token.clone().drop_guard());
        drop(relay);
        assert!(token.is_cancelled());
    }
}
