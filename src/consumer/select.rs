//! Readiness multiplexer.
//!
//! [`Select`] waits until one of several sources has data, lets that source
//! ingest it, and reports which one it was. Sources that still hold more
//! than one decoded item stay queued as ready so the caller keeps draining
//! them without waiting on the socket again.

use crate::core::error::FeedResult;
use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

/// Something [`Select`] can wait on.
pub trait Selectable: Send {
    /// Resolve once new data can be read without blocking indefinitely.
    ///
    /// Must be cancel-safe: [`Select`] drops the futures of every source
    /// that did not win.
    fn readable(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>>;

    /// Ingest the data that made this source readable.
    ///
    /// Runs under the select timeout, so it must be cancel-safe as well.
    fn read_data(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>>;

    /// More than one item is available without further I/O.
    fn has_cached_data(&self) -> bool {
        false
    }

    /// Data was loaded before the source was first selected.
    fn initialized_with_data(&self) -> bool {
        false
    }

    /// Hook run after [`read_data`](Self::read_data).
    fn update_after_read(&mut self) {}

    /// Higher priorities are polled first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Result of a [`Select::select`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Index of the source that has data.
    Object(usize),
    /// Nothing became ready within the timeout.
    Timeout,
}

/// Multiplexer state carried between calls.
///
/// Sources are identified by their index in the slice passed to
/// [`select`](Self::select); pass them in the same order every time.
#[derive(Debug, Default)]
pub struct Select {
    ready: VecDeque<usize>,
    seen: usize,
}

impl Select {
    /// Create an empty multiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for a source to have data.
    ///
    /// `None` waits forever. An empty source list times out immediately.
    pub async fn select(
        &mut self,
        sources: &mut [&mut dyn Selectable],
        timeout: Option<Duration>,
    ) -> FeedResult<SelectOutcome> {
        if sources.is_empty() {
            return Ok(SelectOutcome::Timeout);
        }

        for (idx, source) in sources.iter().enumerate().skip(self.seen) {
            if source.initialized_with_data() {
                self.ready.push_back(idx);
            }
        }
        self.seen = self.seen.max(sources.len());

        while let Some(idx) = self.ready.pop_front() {
            if idx < sources.len() {
                return Ok(self.picked(sources, idx));
            }
        }

        let idx = match timeout {
            Some(duration) => match tokio::time::timeout(duration, ingest(sources)).await {
                Ok(result) => result?,
                Err(_) => return Ok(SelectOutcome::Timeout),
            },
            None => ingest(sources).await?,
        };
        Ok(self.picked(sources, idx))
    }

    fn picked(&mut self, sources: &[&mut dyn Selectable], idx: usize) -> SelectOutcome {
        if sources[idx].has_cached_data() {
            self.ready.push_back(idx);
        }
        SelectOutcome::Object(idx)
    }
}

/// Wait for the first readable source and let it read its data.
async fn ingest(sources: &mut [&mut dyn Selectable]) -> FeedResult<usize> {
    let idx = wait_readable(sources).await?;
    sources[idx].read_data().await?;
    sources[idx].update_after_read();
    Ok(idx)
}

async fn wait_readable(sources: &mut [&mut dyn Selectable]) -> FeedResult<usize> {
    let mut pending: Vec<_> = sources
        .iter_mut()
        .enumerate()
        .map(|(idx, source)| (source.priority(), idx, source.readable()))
        .collect();
    pending.sort_by_key(|(priority, idx, _)| (std::cmp::Reverse(*priority), *idx));

    poll_fn(|cx| {
        for (_, idx, fut) in pending.iter_mut() {
            if let Poll::Ready(result) = fut.as_mut().poll(cx) {
                return Poll::Ready(result.map(|()| *idx));
            }
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FeedError;
    use tokio::sync::mpsc;

    struct Scripted {
        rx: mpsc::UnboundedReceiver<u32>,
        pending: Option<u32>,
        received: Vec<u32>,
        cached: bool,
        preloaded: bool,
        stalled: bool,
        priority: i32,
    }

    impl Scripted {
        fn new() -> (Self, mpsc::UnboundedSender<u32>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Self {
                rx,
                pending: None,
                received: Vec::new(),
                cached: false,
                preloaded: false,
                stalled: false,
                priority: 0,
            };
            (source, tx)
        }

        async fn wait(&mut self) -> FeedResult<()> {
            if self.pending.is_none() {
                self.pending = Some(self.rx.recv().await.ok_or(FeedError::ConnectionClosed)?);
            }
            Ok(())
        }
    }

    impl Selectable for Scripted {
        fn readable(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>> {
            Box::pin(self.wait())
        }

        fn read_data(&mut self) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + '_>> {
            if self.stalled {
                return Box::pin(std::future::pending());
            }
            self.received.extend(self.pending.take());
            Box::pin(std::future::ready(Ok(())))
        }

        fn has_cached_data(&self) -> bool {
            self.cached
        }

        fn initialized_with_data(&self) -> bool {
            self.preloaded
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[tokio::test]
    async fn test_select_returns_ready_source() {
        let (mut a, _tx_a) = Scripted::new();
        let (mut b, tx_b) = Scripted::new();
        tx_b.send(7).unwrap();

        let mut select = Select::new();
        let outcome = select
            .select(&mut [&mut a, &mut b], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::Object(1));
        assert_eq!(b.received, vec![7]);
        assert!(a.received.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_times_out() {
        let (mut a, _tx) = Scripted::new();
        let mut select = Select::new();
        let outcome = select
            .select(&mut [&mut a], Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_slow_read() {
        let (mut a, tx) = Scripted::new();
        a.stalled = true;
        tx.send(1).unwrap();

        let mut select = Select::new();
        let outcome = select
            .select(&mut [&mut a], Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::Timeout);
        assert!(a.received.is_empty());
    }

    #[tokio::test]
    async fn test_select_empty_sources() {
        let mut select = Select::new();
        let outcome = select.select(&mut [], None).await.unwrap();
        assert_eq!(outcome, SelectOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_initialized_source_is_ready_without_io() {
        let (mut a, _tx) = Scripted::new();
        a.preloaded = true;

        let mut select = Select::new();
        let outcome = select.select(&mut [&mut a], None).await.unwrap();
        assert_eq!(outcome, SelectOutcome::Object(0));
        assert!(a.received.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_source_is_requeued() {
        let (mut a, tx) = Scripted::new();
        a.cached = true;
        tx.send(1).unwrap();

        let mut select = Select::new();
        let timeout = Some(Duration::from_millis(10));
        assert_eq!(
            select.select(&mut [&mut a], timeout).await.unwrap(),
            SelectOutcome::Object(0)
        );

        // queued again because more than one item is cached
        a.cached = false;
        assert_eq!(
            select.select(&mut [&mut a], timeout).await.unwrap(),
            SelectOutcome::Object(0)
        );
        assert_eq!(
            select.select(&mut [&mut a], timeout).await.unwrap(),
            SelectOutcome::Timeout
        );
    }

    #[tokio::test]
    async fn test_priority_breaks_ties() {
        let (mut low, tx_low) = Scripted::new();
        let (mut high, tx_high) = Scripted::new();
        high.priority = 10;
        tx_low.send(1).unwrap();
        tx_high.send(2).unwrap();

        let mut select = Select::new();
        let outcome = select
            .select(&mut [&mut low, &mut high], None)
            .await
            .unwrap();
        assert_eq!(outcome, SelectOutcome::Object(1));
        assert_eq!(high.received, vec![2]);
    }

    #[tokio::test]
    async fn test_closed_source_is_an_error() {
        let (mut a, tx) = Scripted::new();
        drop(tx);

        let mut select = Select::new();
        let err = select.select(&mut [&mut a], None).await.unwrap_err();
        assert!(matches!(err, FeedError::ConnectionClosed));
    }
}
