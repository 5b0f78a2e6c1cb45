//! Bounded-concurrency request fan-out
//!
//! Requests are pulled lazily from the key iterator so that at most
//! `window` of them exist at any time. Results are handed back to the
//! caller's closure on the driving task, one at a time, so callers merge
//! into plain owned maps without locking.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

use crate::error::Result;

/// Run `fetch` for every key with at most `window` requests in flight and
/// pass each `(key, result)` to `on_result` in completion order.
pub async fn for_each_bounded<K, T, I, F, Fut, S>(
    keys: I,
    window: usize,
    fetch: F,
    mut on_result: S,
)
where
    K: Clone,
    I: IntoIterator<Item = K>,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T>>,
    S: FnMut(K, Result<T>),
{
    let window = window.max(1);
    let mut queue = keys.into_iter();
    let mut in_flight = FuturesUnordered::new();

    let start = |key: K| {
        let request = fetch(key.clone());
        async move { (key, request.await) }
    };

    for key in queue.by_ref().take(window) {
        in_flight.push(start(key));
    }

    while let Some((key, result)) = in_flight.next().await {
        on_result(key, result);
        if let Some(next) = queue.next() {
            in_flight.push(start(next));
        }
    }
}

/// Split `items` into `chunks` round-robin groups: group `i` holds items
/// `i, i + chunks, i + 2 * chunks, ...`. Empty groups are omitted.
pub fn round_robin_chunks<T: Clone>(items: &[T], chunks: usize) -> Vec<Vec<T>> {
    let chunks = chunks.max(1);
    (0..chunks)
        .map(|offset| items.iter().skip(offset).step_by(chunks).cloned().collect::<Vec<_>>())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_round_robin_chunks() {
        let items: Vec<u32> = (0..7).collect();
        let chunks = round_robin_chunks(&items, 3);
        assert_eq!(chunks, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn test_round_robin_omits_empty_chunks() {
        let items = vec!["a", "b"];
        let chunks = round_robin_chunks(&items, 100);
        assert_eq!(chunks, vec![vec!["a"], vec!["b"]]);
        assert!(round_robin_chunks::<u8>(&[], 4).is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_in_flight_requests() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut seen = Vec::new();

        for_each_bounded(
            0..40u64,
            4,
            |key| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1 + key % 3)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u64, HarvestError>(key * 2)
                }
            },
            |key, result| seen.push((key, result.unwrap())),
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(seen.len(), 40);
        seen.sort();
        assert_eq!(seen[39], (39, 78));
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_siblings() {
        let mut ok = 0;
        let mut failed = Vec::new();

        for_each_bounded(
            vec!["a", "b", "c"],
            2,
            |key| async move {
                if key == "b" {
                    Err(HarvestError::shape(key, "boom"))
                } else {
                    Ok(())
                }
            },
            |key, result| match result {
                Ok(()) => ok += 1,
                Err(_) => failed.push(key),
            },
        )
        .await;

        assert_eq!(ok, 2);
        assert_eq!(failed, vec!["b"]);
    }
}
