//! Cancellable background tasks.
//!
//! Every long-running controller loop is spawned through [`TaskHandle::spawn`], which
//! hands the task a [`StopSignal`] backed by a `watch` channel. Stopping is cooperative:
//! the task finishes the operation it is in, then observes the signal and returns.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{AppResult, BridgeError};

/// Receiving side of a task's stop signal.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// True once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when a stop is requested or the owning [`TaskHandle`] is dropped.
    pub async fn stopped(&mut self) {
        // A closed channel means the handle is gone, which also means stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Handle on a spawned task: a stop signal plus the join handle.
///
/// Tasks are critical by default: when one fails, the supervisor stops the bridge.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    critical: bool,
    stop: watch::Sender<bool>,
    join: JoinHandle<AppResult<()>>,
}

impl TaskHandle {
    /// Spawns `task` on the Tokio runtime, passing it the stop signal.
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let (stop, rx) = watch::channel(false);
        let join = tokio::spawn(task(StopSignal { rx }));
        Self {
            name: name.into(),
            critical: true,
            stop,
            join,
        }
    }

    /// Marks whether a failure of this task should stop the bridge.
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Task name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a failure of this task stops the bridge.
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Requests a stop without waiting for it.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// True once the task has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task to return on its own.
    ///
    /// Must not be called again after it has resolved.
    pub async fn wait(&mut self) -> AppResult<()> {
        let result = (&mut self.join).await;
        Self::flatten(&self.name, result)
    }

    /// Waits for the task to return and consumes the handle.
    pub async fn join(self) -> AppResult<()> {
        let result = self.join.await;
        Self::flatten(&self.name, result)
    }

    /// Requests a stop and waits for the task to return.
    pub async fn shutdown(self) -> AppResult<()> {
        self.stop();
        self.join().await
    }

    fn flatten(
        name: &str,
        result: Result<AppResult<()>, tokio::task::JoinError>,
    ) -> AppResult<()> {
        match result {
            Ok(inner) => inner,
            Err(e) => Err(BridgeError::Task(name.to_string(), e.to_string())),
        }
    }
}

/// Runs `cycle` every `interval` until stopped.
///
/// The first cycle runs immediately; the interval is measured from the end of one cycle
/// to the start of the next. A failing cycle ends the loop and its error is returned.
pub async fn run_periodic<F, Fut>(
    name: &str,
    interval: Duration,
    mut stop: StopSignal,
    mut cycle: F,
) -> AppResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    info!(task = name, ?interval, "Polling started");
    loop {
        if stop.is_stopped() {
            break;
        }
        if let Err(e) = cycle().await {
            error!(task = name, error = %e, "Polling cycle failed, stopping task");
            return Err(e);
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.stopped() => break,
        }
    }
    info!(task = name, "Polling stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_task_stops_on_signal() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = cycles.clone();
        let handle = TaskHandle::spawn("counter", move |stop| async move {
            run_periodic("counter", Duration::from_millis(5), stop, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await.unwrap();

        let seen = cycles.load(Ordering::SeqCst);
        assert!(seen >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_failing_cycle_ends_task_with_error() {
        let mut handle = TaskHandle::spawn("failing", |stop| async move {
            run_periodic("failing", Duration::from_millis(5), stop, || async {
                Err(BridgeError::parse("garbage", "not a number"))
            })
            .await
        });

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, BridgeError::Parse { .. }));
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_panicking_task_reports_task_error() {
        let handle = TaskHandle::spawn("panicky", |_stop| async move {
            let readings: Vec<f64> = Vec::new();
            if readings[0] > 0.0 {
                return Ok(());
            }
            Ok(())
        });
        match handle.join().await {
            Err(BridgeError::Task(name, _)) => assert_eq!(name, "panicky"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_long_interval_does_not_delay_stop() {
        let handle = TaskHandle::spawn("slow", |stop| async move {
            run_periodic("slow", Duration::from_secs(3600), stop, || async { Ok(()) }).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("task did not observe stop")
            .unwrap();
    }
}
