use std::collections::VecDeque;

use crate::error::Result;

/// Outcome of posting an operation to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostOutcome {
    /// The provider accepted the operation.
    Posted,
    /// The provider was temporarily out of resources. Retry later.
    Again,
}

/// Retry queued requests in FIFO order.
///
/// A posted request leaves the queue. A request that is refused again
/// stays at the front and stops the drain. Any other error is surfaced
/// with the request still at the front.
pub(crate) fn drain<T: Copy>(
    queue: &mut VecDeque<T>,
    mut retry: impl FnMut(T) -> Result<PostOutcome>,
) -> Result<()> {
    while let Some(&head) = queue.front() {
        match retry(head)? {
            PostOutcome::Posted => {
                queue.pop_front();
            }
            PostOutcome::Again => break,
        }
    }
    Ok(())
}
