use std::future::Future;

use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tasktalk_types::events::ChangeEvent;

use crate::dispatcher::Dispatcher;

/// A live query. Holds the latest-snapshot feed of one projection; the
/// producing task stops when the handle is dropped or `unsubscribe`d.
///
/// Every relevant change recomputes the whole snapshot. Snapshots queue
/// without bound until read.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Starts a subscription: delivers `load()` once immediately, then again
    /// after every change event accepted by `relevant`.
    pub fn spawn<R, L, Fut>(dispatcher: &Dispatcher, relevant: R, load: L) -> Self
    where
        R: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
        L: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        // Subscribe before the first load so a change in between is not lost.
        let mut events = dispatcher.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            if !deliver(&tx, &load).await {
                return;
            }
            loop {
                match events.recv().await {
                    Ok(event) if relevant(&event) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Subscription lagged by {} events, reloading", n);
                    }
                    Err(RecvError::Closed) => break,
                }
                if !deliver(&tx, &load).await {
                    break;
                }
            }
            debug!("Subscription task finished");
        });

        Self { rx, task }
    }

    /// Waits for the next snapshot. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// A snapshot that is already queued, without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn into_stream(mut self) -> impl Stream<Item = T> + Send {
        async_stream::stream! {
            while let Some(snapshot) = self.next().await {
                yield snapshot;
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Loads and forwards one snapshot. Returns false once nobody is listening.
async fn deliver<T, L, Fut>(tx: &mpsc::UnboundedSender<T>, load: &L) -> bool
where
    L: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match load().await {
        Ok(snapshot) => tx.send(snapshot).is_ok(),
        Err(e) => {
            // Listener errors are reported and the subscription stays up.
            warn!("Snapshot load failed: {:#}", e);
            !tx.is_closed()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::StreamExt;
    use uuid::Uuid;

    use super::*;

    fn counting_subscription(
        dispatcher: &Dispatcher,
        owner_id: Uuid,
    ) -> (Subscription<usize>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let sub = Subscription::spawn(
            dispatcher,
            move |event| matches!(event, ChangeEvent::TasksChanged { owner_id: o } if *o == owner_id),
            move || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
            },
        );
        (sub, loads)
    }

    #[tokio::test]
    async fn initial_snapshot_then_only_relevant_changes() {
        let dispatcher = Dispatcher::new();
        let owner = Uuid::new_v4();
        let (mut sub, _) = counting_subscription(&dispatcher, owner);

        assert_eq!(sub.next().await, Some(1));

        dispatcher.publish(ChangeEvent::TasksChanged { owner_id: Uuid::new_v4() });
        dispatcher.publish(ChangeEvent::TasksChanged { owner_id: owner });
        assert_eq!(sub.next().await, Some(2));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn failed_load_keeps_subscription_alive() {
        let dispatcher = Dispatcher::new();
        let owner_id = Uuid::new_v4();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut sub = Subscription::spawn(
            &dispatcher,
            |_| true,
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        anyhow::bail!("store unavailable");
                    }
                    Ok(n)
                }
            },
        );

        // Wait until the failed initial load has happened before publishing.
        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.publish(ChangeEvent::TasksChanged { owner_id });
        assert_eq!(sub.next().await, Some(1));
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_listener() {
        let dispatcher = Dispatcher::new();
        let (mut sub, _) = counting_subscription(&dispatcher, Uuid::new_v4());
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(dispatcher.listener_count(), 1);

        sub.unsubscribe();
        for _ in 0..100 {
            if dispatcher.listener_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn stream_adapter_yields_snapshots() {
        let dispatcher = Dispatcher::new();
        let owner = Uuid::new_v4();
        let (sub, _) = counting_subscription(&dispatcher, owner);
        let mut stream = Box::pin(sub.into_stream());

        assert_eq!(stream.next().await, Some(1));
        dispatcher.publish(ChangeEvent::TasksChanged { owner_id: owner });
        assert_eq!(stream.next().await, Some(2));
    }
}
