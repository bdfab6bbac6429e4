//! Buffered consumer.
//!
//! [`ConsumerTableBase`] owns an ordered buffer of decoded changes and hands
//! them out one at a time. Where changes come from is decided by the
//! [`Refill`] strategy it is built with.

use super::{KeyOpFieldsValues, DEFAULT_POP_BATCH_SIZE, EMPTY_PREFIX};
use crate::core::error::FeedResult;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

/// Source of changes for a buffered consumer.
pub trait Refill: Send {
    /// Append newly available changes to `out`.
    ///
    /// `batch_size` is advisory; implementations may append more or fewer.
    /// Appending nothing means no data is available right now.
    fn pops<'a>(
        &'a mut self,
        out: &'a mut VecDeque<KeyOpFieldsValues>,
        prefix: &'a str,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + 'a>>;
}

impl<F> Refill for F
where
    F: FnMut(&mut VecDeque<KeyOpFieldsValues>, &str, usize) -> FeedResult<()> + Send,
{
    fn pops<'a>(
        &'a mut self,
        out: &'a mut VecDeque<KeyOpFieldsValues>,
        prefix: &'a str,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = FeedResult<()>> + Send + 'a>> {
        Box::pin(std::future::ready((*self)(out, prefix, batch_size)))
    }
}

/// FIFO of decoded changes in front of a refill strategy.
#[derive(Debug)]
pub struct ConsumerTableBase<R> {
    source: R,
    buffer: VecDeque<KeyOpFieldsValues>,
    pop_batch_size: usize,
}

impl<R: Refill> ConsumerTableBase<R> {
    /// Create a consumer with the default batch size.
    pub fn new(source: R) -> Self {
        Self::with_batch_size(source, DEFAULT_POP_BATCH_SIZE)
    }

    /// Create a consumer with an explicit advisory batch size.
    pub fn with_batch_size(source: R, pop_batch_size: usize) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            pop_batch_size,
        }
    }

    /// Pop the next change, refilling from the source if the buffer is empty.
    ///
    /// `Ok(None)` means nothing is available right now. Calling again in a
    /// tight loop is harmless.
    pub async fn pop(&mut self) -> FeedResult<Option<KeyOpFieldsValues>> {
        self.pop_with_prefix(EMPTY_PREFIX).await
    }

    /// Like [`pop`](Self::pop), forwarding `prefix` to the refill strategy.
    pub async fn pop_with_prefix(&mut self, prefix: &str) -> FeedResult<Option<KeyOpFieldsValues>> {
        if self.buffer.is_empty() {
            self.source
                .pops(&mut self.buffer, prefix, self.pop_batch_size)
                .await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Advisory refill batch size.
    pub fn pop_batch_size(&self) -> usize {
        self.pop_batch_size
    }

    /// Number of changes already decoded and waiting.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Refill strategy.
    pub fn source(&self) -> &R {
        &self.source
    }

    /// Refill strategy, mutably.
    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// Move every buffered change plus one refill into `out`.
    ///
    /// Unlike [`pop`](Self::pop), the refill runs even when the buffer was
    /// not empty. Buffered changes come first, so order is kept; a single
    /// call may therefore return more than one refill's worth.
    pub async fn drain_into(&mut self, out: &mut VecDeque<KeyOpFieldsValues>) -> FeedResult<()> {
        out.extend(self.buffer.drain(..));
        self.source
            .pops(out, EMPTY_PREFIX, self.pop_batch_size)
            .await
    }
}
