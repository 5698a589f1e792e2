use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Opaque dedup key; tasks enqueued with the same holder coalesce while one
/// is still pending.
pub type HolderKey = u64;

type Task<C> = Box<dyn FnOnce(&mut C) + Send>;

struct Inner<C> {
    tasks: VecDeque<(Option<HolderKey>, Task<C>)>,
    pending_holders: HashSet<HolderKey>,
}

/// Single-reader FIFO that lets I/O callbacks post deferred work onto the
/// simulation thread. Producers may live on any thread; `execute` must only
/// be called by the thread that owns the context.
pub struct MainThreadExecutor<C> {
    inner: Mutex<Inner<C>>,
}

impl<C> Default for MainThreadExecutor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MainThreadExecutor<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                pending_holders: HashSet::new(),
            }),
        }
    }

    /// Queues `task`. With a holder key the enqueue is idempotent: a second
    /// task under the same key is dropped while the first is still pending.
    /// Returns whether the task was accepted.
    pub fn enqueue(
        &self,
        holder: Option<HolderKey>,
        task: impl FnOnce(&mut C) + Send + 'static,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = holder {
            if !inner.pending_holders.insert(key) {
                return false;
            }
        }
        inner.tasks.push_back((holder, Box::new(task)));
        true
    }

    /// Removes any pending task tied to `holder`.
    pub fn cancel(&self, holder: HolderKey) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_holders.remove(&holder);
        inner.tasks.retain(|(key, _)| *key != Some(holder));
    }

    /// Drains everything queued so far and runs it against `context`. The
    /// queue is swapped out first; no task runs while the lock is held, so
    /// tasks are free to enqueue more work.
    pub fn execute(&self, context: &mut C) {
        let drained: VecDeque<_> = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            for (holder, _) in &inner.tasks {
                if let Some(key) = holder {
                    inner.pending_holders.remove(key);
                }
            }
            std::mem::take(&mut inner.tasks)
        };

        for (_, task) in drained {
            task(context);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let executor: MainThreadExecutor<Vec<u32>> = MainThreadExecutor::new();
        executor.enqueue(None, |out| out.push(1));
        executor.enqueue(None, |out| out.push(2));
        executor.enqueue(None, |out| out.push(3));

        let mut out = Vec::new();
        executor.execute(&mut out);
        assert_eq!(out, vec![1, 2, 3]);
        assert!(executor.is_empty());
    }

    #[test]
    fn test_holder_enqueue_is_idempotent() {
        let executor: MainThreadExecutor<u32> = MainThreadExecutor::new();
        assert!(executor.enqueue(Some(7), |count| *count += 1));
        assert!(!executor.enqueue(Some(7), |count| *count += 1));
        assert!(executor.enqueue(Some(8), |count| *count += 10));

        let mut count = 0;
        executor.execute(&mut count);
        assert_eq!(count, 11);

        // After execution the holder is free again.
        assert!(executor.enqueue(Some(7), |count| *count += 1));
    }

    #[test]
    fn test_cancel_removes_pending_task() {
        let executor: MainThreadExecutor<u32> = MainThreadExecutor::new();
        executor.enqueue(Some(1), |count| *count += 1);
        executor.cancel(1);

        let mut count = 0;
        executor.execute(&mut count);
        assert_eq!(count, 0);
        assert!(executor.enqueue(Some(1), |count| *count += 1));
    }

    #[test]
    fn test_tasks_may_enqueue_more_work() {
        let executor: std::sync::Arc<MainThreadExecutor<Vec<u32>>> =
            std::sync::Arc::new(MainThreadExecutor::new());

        let inner = executor.clone();
        executor.enqueue(None, move |out| {
            out.push(1);
            inner.enqueue(None, |out| out.push(2));
        });

        let mut out = Vec::new();
        executor.execute(&mut out);
        assert_eq!(out, vec![1]);
        executor.execute(&mut out);
        assert_eq!(out, vec![1, 2]);
    }
}
