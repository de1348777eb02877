//! Structured fan-out of independent I/O-bound tasks
//!
//! Every task starts as soon as it is spawned. Joining waits for all of them
//! and reports outcomes in submission order, so a failure is never lost just
//! because nobody looked at that task's value. Keyed groups return
//! `(key, value)` pairs that are inserted into the output map by the joining
//! task only, after every task has settled.
//!
//! Dropping a group without joining it aborts whatever is still running.

use cephci_common::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error};

/// Fan-out group over tasks producing `T`
pub struct TaskGroup<T> {
    join_set: JoinSet<Result<T>>,
    labels: Vec<String>,
    indices: HashMap<Id, usize>,
    fail_fast: bool,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Group that lets every task run to completion
    pub fn new() -> Self {
        Self {
            join_set: JoinSet::new(),
            labels: Vec::new(),
            indices: HashMap::new(),
            fail_fast: false,
        }
    }

    /// Group that aborts the remaining tasks on the first observed failure
    pub fn fail_fast() -> Self {
        Self {
            fail_fast: true,
            ..Self::new()
        }
    }

    /// Start `task` immediately; `label` names it in failures and logs
    pub fn spawn<F>(&mut self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        debug!(task = %label, "Spawning task");

        let handle = self.join_set.spawn(task);
        self.indices.insert(handle.id(), self.labels.len());
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Wait for every task and return each outcome in submission order
    pub async fn join(self) -> Vec<Result<T>> {
        self.settle().await.0
    }

    /// Wait for every task; all values in submission order, or the first
    /// failure in submission order.
    ///
    /// For fail-fast groups the failure that triggered the abort is returned
    /// rather than a sibling's cancellation.
    pub async fn join_all(self) -> Result<Vec<T>> {
        let (mut outcomes, trigger) = self.settle().await;

        if let Some(index) = trigger {
            if let Err(e) = outcomes.swap_remove(index) {
                return Err(e);
            }
        }

        outcomes.into_iter().collect()
    }

    async fn settle(mut self) -> (Vec<Result<T>>, Option<usize>) {
        let mut slots: Vec<Option<Result<T>>> = (0..self.labels.len()).map(|_| None).collect();
        let mut trigger = None;

        while let Some(joined) = self.join_set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, Ok(result)),
                Err(join_error) => {
                    let id = join_error.id();
                    let detail = match join_error.try_into_panic() {
                        Ok(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
                        Err(_) => "cancelled".to_string(),
                    };
                    (id, Err(detail))
                }
            };

            let Some(&index) = self.indices.get(&id) else {
                continue;
            };
            let label = &self.labels[index];

            let outcome = outcome.unwrap_or_else(|detail| {
                Err(Error::TaskFailed {
                    label: label.clone(),
                    detail,
                })
            });

            if let Err(e) = &outcome {
                error!(task = %label, "Task failed: {}", e);
                if self.fail_fast && trigger.is_none() {
                    trigger = Some(index);
                    self.join_set.abort_all();
                }
            }

            slots[index] = Some(outcome);
        }

        let outcomes = slots
            .into_iter()
            .zip(self.labels.iter())
            .map(|(slot, label)| {
                slot.unwrap_or_else(|| {
                    Err(Error::TaskFailed {
                        label: label.clone(),
                        detail: "no result".to_string(),
                    })
                })
            })
            .collect();

        (outcomes, trigger)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string payload"
    }
}

impl<K, V> TaskGroup<(K, V)>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Wait for every task and build the map from the returned pairs
    pub async fn join_map(self) -> Result<HashMap<K, V>> {
        Ok(self.join_all().await?.into_iter().collect())
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_group() {
        let group: TaskGroup<u32> = TaskGroup::new();
        assert!(group.is_empty());
        assert!(group.join_all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_submission_order() {
        let mut group = TaskGroup::new();
        for (i, delay) in [30u64, 10, 20].into_iter().enumerate() {
            group.spawn(format!("task{}", i), async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(i)
            });
        }

        assert_eq!(group.join_all().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_in_submission_order() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::new();

        // task0 fails last, task2 fails first; submission order wins
        for (i, delay) in [50u64, 10, 5].into_iter().enumerate() {
            let finished = finished.clone();
            group.spawn(format!("task{}", i), async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Ok(i)
                } else {
                    Err(Error::Parse(format!("task{}", i)))
                }
            });
        }

        let err = group.join_all().await.unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m == "task0"));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_reports_every_outcome() {
        let mut group = TaskGroup::new();
        group.spawn("ok", async { Ok(1) });
        group.spawn("bad", async { Err(Error::provider("create_node", "quota")) });
        group.spawn("ok2", async { Ok(3) });

        let outcomes = group.join().await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], Ok(1)));
        assert!(matches!(outcomes[1], Err(Error::Provider { .. })));
        assert!(matches!(outcomes[2], Ok(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_aborts_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut group = TaskGroup::fail_fast();

        let slow = finished.clone();
        group.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            slow.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        group.spawn("broken", async { Err(Error::Parse("boom".to_string())) });

        let err = group.join_all().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let mut group: TaskGroup<()> = TaskGroup::new();
        group.spawn("explodes", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let err = group.join_all().await.unwrap_err();
        match err {
            Error::TaskFailed { label, detail } => {
                assert_eq!(label, "explodes");
                assert_eq!(detail, "panicked: kaboom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message_is_kept() {
        let mut group: TaskGroup<()> = TaskGroup::new();
        group.spawn("node7", async {
            let attempt = 3;
            if attempt > 2 {
                panic!("gave up on attempt {}", attempt);
            }
            Ok(())
        });

        let err = group.join_all().await.unwrap_err();
        assert!(err.to_string().contains("panicked: gave up on attempt 3"));
    }

    #[tokio::test]
    async fn test_join_map_collects_pairs() {
        let mut group = TaskGroup::new();
        for id in ["node1", "node2", "node3"] {
            group.spawn(id, async move { Ok((id.to_string(), id.len())) });
        }

        let map = group.join_map().await.unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["node2"], 5);
    }
}
