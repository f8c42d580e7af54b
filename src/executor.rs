//! Bounded-concurrency task executor shared by every pipeline stage.
//!
//! Rendering, normalisation, measurement and extraction all go through
//! [`run_bounded`]. It keeps at most `limit` operations in flight, returns one
//! outcome per input in input order, and never lets one item's failure cancel
//! its siblings.
//!
//! ## Model
//!
//! `limit` workers share a cursor. A free worker claims the next unclaimed
//! index, awaits the operation for that input, records the outcome against the
//! claimed index, and loops until the cursor runs past the end. Each index is
//! claimed exactly once, so the per-worker outcome lists are disjoint and can
//! be merged without locking.
//!
//! All workers are polled from the calling task (`join_all`): concurrency
//! comes from the operations being I/O-bound (child processes, HTTP), not from
//! extra threads. The operation may therefore borrow from the caller's stack.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Apply `op` to every input with at most `limit` operations outstanding.
///
/// `limit` is clamped to `1..=inputs.len()`. The returned vector has exactly
/// `inputs.len()` entries and `result[i]` is the outcome for `inputs[i]`,
/// regardless of completion order.
///
/// # Example
/// ```rust
/// use edgequake_pdf2pages::executor::run_bounded;
///
/// # tokio_test::block_on(async {
/// let doubled = run_bounded(&[1, 2, 3], 2, |n| {
///     let n = *n;
///     async move { Ok::<_, String>(n * 2) }
/// })
/// .await;
/// assert_eq!(doubled, vec![Ok(2), Ok(4), Ok(6)]);
/// # });
/// ```
pub async fn run_bounded<'a, I, T, E, F, Fut>(
    inputs: &'a [I],
    limit: usize,
    op: F,
) -> Vec<Result<T, E>>
where
    F: Fn(&'a I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = inputs.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = limit.clamp(1, total);
    let cursor = AtomicUsize::new(0);
    let op = &op;
    let cursor = &cursor;

    let lanes = (0..workers).map(|_| async move {
        let mut claimed = Vec::new();
        loop {
            let idx = cursor.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                break;
            }
            claimed.push((idx, op(&inputs[idx]).await));
        }
        claimed
    });

    let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();
    for lane in join_all(lanes).await {
        for (idx, outcome) in lane {
            slots[idx] = Some(outcome);
        }
    }

    let results: Vec<Result<T, E>> = slots.into_iter().flatten().collect();
    debug_assert_eq!(results.len(), total);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn preserves_input_order_despite_completion_order() {
        // Later items finish first.
        let inputs: Vec<u64> = (0..8).collect();
        let results = run_bounded(&inputs, 4, |n| {
            let n = *n;
            async move {
                sleep(Duration::from_millis(40 - n * 5)).await;
                Ok::<_, String>(n * 10)
            }
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        for limit in 1..=5 {
            let in_flight = Cell::new(0usize);
            let peak = Cell::new(0usize);
            let inputs: Vec<usize> = (0..12).collect();

            let results = run_bounded(&inputs, limit, |_| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    in_flight.set(in_flight.get() + 1);
                    peak.set(peak.get().max(in_flight.get()));
                    sleep(Duration::from_millis(2)).await;
                    in_flight.set(in_flight.get() - 1);
                    Ok::<_, ()>(())
                }
            })
            .await;

            assert_eq!(results.len(), 12);
            assert!(peak.get() <= limit, "limit {limit}, peak {}", peak.get());
            assert_eq!(peak.get(), limit, "workers should saturate the limit");
        }
    }

    #[tokio::test]
    async fn failures_do_not_abort_siblings() {
        let inputs = vec![1, 2, 3, 4, 5];
        let results = run_bounded(&inputs, 2, |n| {
            let n = *n;
            async move {
                if n % 2 == 0 {
                    Err(format!("item {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results[0], Ok(1));
        assert_eq!(results[1], Err("item 2 failed".to_string()));
        assert_eq!(results[2], Ok(3));
        assert_eq!(results[3], Err("item 4 failed".to_string()));
        assert_eq!(results[4], Ok(5));
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let inputs = vec!["a", "b"];
        let zero = run_bounded(&inputs, 0, |s| {
            let s = s.to_string();
            async move { Ok::<_, ()>(s) }
        })
        .await;
        assert_eq!(zero, vec![Ok("a".to_string()), Ok("b".to_string())]);

        let huge = run_bounded(&inputs, 1_000, |s| {
            let s = s.len();
            async move { Ok::<_, ()>(s) }
        })
        .await;
        assert_eq!(huge, vec![Ok(1), Ok(1)]);
    }

    #[tokio::test]
    async fn operation_may_borrow_its_input() {
        let inputs = vec!["page-0001.png".to_string(), "page-0002.png".to_string()];
        let results = run_bounded(&inputs, 2, |name| async move {
            sleep(Duration::from_millis(1)).await;
            name.strip_suffix(".png").ok_or(name.as_str())
        })
        .await;
        assert_eq!(results, vec![Ok("page-0001"), Ok("page-0002")]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let inputs: Vec<u8> = Vec::new();
        let results = tokio_test::block_on(run_bounded(&inputs, 3, |_| async {
            Ok::<u8, ()>(0)
        }));
        assert!(results.is_empty());
    }
}
