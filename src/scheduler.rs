use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Cancel,
    RunNow,
}

struct ScheduledTask {
    name: String,
    run_at: DateTime<Utc>,
    control: oneshot::Sender<Control>,
}

#[derive(Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<TaskId, ScheduledTask>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn schedule<F>(&self, name: &str, run_at: DateTime<Utc>, task: F) -> TaskId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (control, mut receiver) = oneshot::channel();
        let delay = (run_at - Utc::now()).to_std().unwrap_or_default();
        let tasks = Arc::clone(&self.tasks);
        let label = name.to_string();

        // hold the lock until the entry exists so an immediate task can claim it
        let mut guard = self.tasks.lock().await;
        tokio::spawn(async move {
            let mut fire = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                control = &mut receiver => matches!(control, Ok(Control::RunNow)),
            };

            let claimed = tasks.lock().await.remove(&id).is_some();
            if !claimed {
                // cancel or run_now raced with the timer
                if let Ok(control) = receiver.try_recv() {
                    fire = control == Control::RunNow;
                }
            }

            if fire {
                info!("running scheduled task {label} ({id})");
                task.await;
            } else {
                debug!("scheduled task {label} ({id}) cancelled");
            }
        });
        guard.insert(
            id,
            ScheduledTask {
                name: name.to_string(),
                run_at,
                control,
            },
        );
        info!("scheduled task {name} ({id}) for {run_at}");
        id
    }

    /// Returns false when the task already fired or is unknown.
    pub async fn cancel(&self, id: TaskId) -> bool {
        self.signal(id, Control::Cancel).await
    }

    pub async fn run_now(&self, id: TaskId) -> bool {
        self.signal(id, Control::RunNow).await
    }

    pub async fn pending(&self) -> Vec<(TaskId, String, DateTime<Utc>)> {
        let mut pending: Vec<_> = self
            .tasks
            .lock()
            .await
            .iter()
            .map(|(id, task)| (*id, task.name.clone(), task.run_at))
            .collect();
        pending.sort_by_key(|(_, _, run_at)| *run_at);
        pending
    }

    async fn signal(&self, id: TaskId, control: Control) -> bool {
        match self.tasks.lock().await.remove(&id) {
            Some(task) => task.control.send(control).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;

    fn counter_task(counter: &Arc<AtomicUsize>, done: oneshot::Sender<()>) -> impl Future<Output = ()> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done.send(());
        }
    }

    #[tokio::test]
    async fn fires_once_after_delay() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done, fired) = oneshot::channel();

        let id = scheduler
            .schedule(
                "recompute",
                Utc::now() + Duration::milliseconds(20),
                counter_task(&counter, done),
            )
            .await;
        assert_eq!(scheduler.pending().await.len(), 1);

        tokio::time::timeout(StdDuration::from_secs(5), fired)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.pending().await.is_empty());
        assert!(!scheduler.cancel(id).await);
    }

    #[tokio::test]
    async fn past_target_runs_immediately() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done, fired) = oneshot::channel();

        scheduler
            .schedule(
                "overdue",
                Utc::now() - Duration::minutes(5),
                counter_task(&counter, done),
            )
            .await;

        tokio::time::timeout(StdDuration::from_secs(5), fired)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_task_never_runs() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done, fired) = oneshot::channel();

        let id = scheduler
            .schedule(
                "later",
                Utc::now() + Duration::minutes(10),
                counter_task(&counter, done),
            )
            .await;

        assert!(scheduler.cancel(id).await);
        assert!(!scheduler.cancel(id).await);
        assert!(!scheduler.run_now(id).await);
        assert!(scheduler.pending().await.is_empty());

        // the task's sender is dropped without sending once it is cancelled
        let outcome = tokio::time::timeout(StdDuration::from_secs(5), fired)
            .await
            .unwrap();
        assert!(outcome.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_now_skips_the_wait() {
        let scheduler = TaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done, fired) = oneshot::channel();

        let id = scheduler
            .schedule(
                "later",
                Utc::now() + Duration::minutes(10),
                counter_task(&counter, done),
            )
            .await;

        assert!(scheduler.run_now(id).await);
        tokio::time::timeout(StdDuration::from_secs(5), fired)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.run_now(id).await);
    }

    #[tokio::test]
    async fn pending_is_ordered_by_target_time() {
        let scheduler = TaskScheduler::new();
        let now = Utc::now();
        let late = scheduler.schedule("late", now + Duration::minutes(20), async {}).await;
        let early = scheduler.schedule("early", now + Duration::minutes(5), async {}).await;

        let pending = scheduler.pending().await;
        assert_eq!(pending[0].0, early);
        assert_eq!(pending[1].0, late);
        assert_eq!(pending[0].1, "early");

        assert!(scheduler.cancel(late).await);
        assert!(scheduler.cancel(early).await);
    }
}
