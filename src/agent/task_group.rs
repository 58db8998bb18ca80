//! Kill-one-kill-all task supervision.
//!
//! Every task receives a clone of the group's [`CancellationToken`]. The
//! first task to finish, or cancellation of the token from outside, cancels
//! the rest. [`TaskGroup::wait`] then waits for every task and reports the
//! first error observed. Cancellation is cooperative: tasks are expected to
//! watch their token at their blocking points.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::prelude::{debug, error};

/// A set of named tasks that live and die together.
#[derive(Debug)]
pub struct TaskGroup<E> {
    tasks: JoinSet<(&'static str, Result<(), E>)>,
    token: CancellationToken,
}

impl<E> TaskGroup<E>
where
    E: From<JoinError> + Send + 'static,
{
    /// Creates an empty group driven by `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token,
        }
    }

    /// The token handed to every task.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns `task`, handing it the group token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let fut = task(self.token.clone());
        self.tasks.spawn(async move { (name, fut.await) });
    }

    /// Waits for the first task to finish (or external cancellation), cancels
    /// the others, waits for all of them and returns the first error.
    pub async fn wait(mut self) -> Result<(), E> {
        let mut first_error = None;

        tokio::select! {
            () = self.token.cancelled() => debug!("Task group cancelled"),
            joined = self.tasks.join_next() => {
                if let Some(joined) = joined {
                    record(joined, &mut first_error);
                }
            }
        }

        self.token.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            record(joined, &mut first_error);
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn record<E: From<JoinError>>(
    joined: Result<(&'static str, Result<(), E>), JoinError>,
    first_error: &mut Option<E>,
) {
    let err = match joined {
        Ok((name, Ok(()))) => {
            debug!("Task finished: name={name}");
            return;
        }
        Ok((name, Err(e))) => {
            debug!("Task failed: name={name}");
            e
        }
        Err(join_err) => {
            error!("Task panicked or was aborted: error={join_err}");
            E::from(join_err)
        }
    };
    if first_error.is_none() {
        *first_error = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum TestError {
        X,
        Y,
        Join,
    }

    impl From<JoinError> for TestError {
        fn from(_: JoinError) -> Self {
            Self::Join
        }
    }

    #[tokio::test]
    async fn failing_task_cancels_long_running_sibling() {
        let a_cancelled = Arc::new(AtomicBool::new(false));
        let mut group = TaskGroup::<TestError>::new(CancellationToken::new());

        let flag = Arc::clone(&a_cancelled);
        group.spawn("a", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        group.spawn("b", |_| async { Err(TestError::X) });

        assert_eq!(group.wait().await, Err(TestError::X));
        assert!(a_cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn error_wins_even_when_success_finishes_first() {
        let mut group = TaskGroup::<TestError>::new(CancellationToken::new());

        group.spawn("a", |_| async { Ok(()) });
        group.spawn("b", |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(TestError::X)
        });

        assert_eq!(group.wait().await, Err(TestError::X));
    }

    #[tokio::test]
    async fn first_error_is_kept() {
        let mut group = TaskGroup::<TestError>::new(CancellationToken::new());

        group.spawn("x", |_| async { Err(TestError::X) });
        group.spawn("y", |token| async move {
            token.cancelled().await;
            Err(TestError::Y)
        });

        assert_eq!(group.wait().await, Err(TestError::X));
    }

    #[tokio::test]
    async fn external_cancel_ends_group_cleanly() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::<TestError>::new(token.clone());
        for name in ["a", "b"] {
            group.spawn(name, |t| async move {
                t.cancelled().await;
                Ok(())
            });
        }

        token.cancel();
        assert_eq!(group.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn panicking_task_surfaces_as_join_error() {
        let mut group = TaskGroup::<TestError>::new(CancellationToken::new());
        group.spawn("boom", |_| async {
            let fuse: Option<()> = None;
            fuse.expect("boom");
            Ok(())
        });

        assert_eq!(group.wait().await, Err(TestError::Join));
    }
}
