//! Per-custodian fan-out.
//!
//! One task per item on a [`JoinSet`]. The set is sized by the input (the
//! custodian roster, so single digits to low tens), so no extra bounding is
//! needed. Dropping the returned future aborts every task still running.

use std::future::Future;

use tokio::task::JoinSet;

use super::error::VaultError;

/// Run `f` over every item concurrently and return the outputs in input
/// order. A panicking task fails the whole batch with
/// [`VaultError::TaskFailed`].
pub async fn run_parallel<T, O, F, Fut>(items: Vec<T>, f: F) -> Result<Vec<O>, VaultError>
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
{
    let count = items.len();
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let task = f(item);
        set.spawn(async move { (index, task.await) });
    }

    let mut slots: Vec<Option<O>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (index, output) = joined.map_err(|e| VaultError::TaskFailed(e.to_string()))?;
        slots[index] = Some(output);
    }

    Ok(slots.into_iter().flatten().collect())
}
