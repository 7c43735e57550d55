//! Bounded-concurrency task runner.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::error;

/// How a task ended.
#[derive(Debug)]
pub enum Settled<T> {
    Completed(T),
    Panicked(String),
}

impl<T> Settled<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Settled::Completed(value) => Some(value),
            Settled::Panicked(_) => None,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `tasks` with at most `limit` executing at once (a limit of zero is
/// treated as one). A new task starts as soon as any running task settles.
/// Every task settles exactly once; a panicking task is reported as
/// [`Settled::Panicked`] without disturbing the others.
///
/// Results are returned in backlog order.
pub async fn run_bounded<I, Fut, T>(tasks: I, limit: usize) -> Vec<Settled<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let limit = limit.max(1);
    let mut running = JoinSet::new();
    let mut results: Vec<Option<Settled<T>>> = Vec::new();

    for (index, task) in tasks.into_iter().enumerate() {
        results.push(None);

        while running.len() >= limit {
            settle_next(&mut running, &mut results).await;
        }

        running.spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            (index, outcome)
        });
    }

    while !running.is_empty() {
        settle_next(&mut running, &mut results).await;
    }

    results
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Settled::Panicked("task was cancelled".to_string())))
        .collect()
}

type TaskOutput<T> = (usize, Result<T, Box<dyn Any + Send>>);

async fn settle_next<T: Send + 'static>(
    running: &mut JoinSet<TaskOutput<T>>,
    results: &mut [Option<Settled<T>>],
) {
    match running.join_next().await {
        Some(Ok((index, Ok(value)))) => results[index] = Some(Settled::Completed(value)),
        Some(Ok((index, Err(payload)))) => {
            let message = panic_message(payload);
            error!(task = index, "Task panicked: {}", message);
            results[index] = Some(Settled::Panicked(message));
        }
        // Panics are caught inside the task, so this is only reachable if
        // the runtime cancelled it; the slot stays empty.
        Some(Err(err)) => error!("Task failed to join: {}", err),
        None => {}
    }
}
