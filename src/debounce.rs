use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Coalesces bursts of values: every push restarts the settle window, and
/// only the last value pushed before the window elapses reaches the callback.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawns the coalescing task on the current tokio runtime. The task ends
    /// once every handle is dropped, flushing a pending value first.
    pub fn spawn<F, Fut>(settle: Duration, mut on_settle: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        tokio::spawn(async move {
            let mut pending: Option<T> = None;
            loop {
                match pending.take() {
                    None => match rx.recv().await {
                        Some(value) => pending = Some(value),
                        None => break,
                    },
                    Some(value) => {
                        tokio::select! {
                            next = rx.recv() => match next {
                                Some(newer) => pending = Some(newer),
                                None => {
                                    on_settle(value).await;
                                    break;
                                }
                            },
                            _ = tokio::time::sleep(settle) => on_settle(value).await,
                        }
                    }
                }
            }
            debug!("Debouncer stopped");
        });
        Self { tx }
    }

    pub fn push(&self, value: T) {
        if self.tx.send(value).is_err() {
            debug!("Debouncer task is gone; dropping value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Debouncer<String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let debouncer = Debouncer::spawn(DEFAULT_SETTLE, move |v: String| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(v);
            }
        });
        (seen, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_inside_window_collapse_to_last() {
        let (seen, debouncer) = recorder();
        for text in ["b", "ba", "bat", "batm", "batman"] {
            debouncer.push(text.to_string());
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["batman".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_each_fire_once() {
        let (seen, debouncer) = recorder();
        debouncer.push("alien".to_string());
        tokio::time::sleep(Duration::from_millis(700)).await;
        debouncer.push("aliens".to_string());
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["alien".to_string(), "aliens".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_flushes_pending_value() {
        let (seen, debouncer) = recorder();
        debouncer.push("heat".to_string());
        drop(debouncer);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["heat".to_string()]);
    }
}
