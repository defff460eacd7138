use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::trace;
use uuid::Uuid;

use tasktalk_types::events::ChangeEvent;

/// Capacity of the change feed. Slow subscribers that fall further behind
/// get `Lagged` and recompute from the store.
const FEED_CAPACITY: usize = 1024;

/// Fan-out of store change notifications to every live subscription.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for change events; every subscription sees every event
    feed_tx: broadcast::Sender<ChangeEvent>,

    /// Open gateway connections per user
    online_users: RwLock<HashMap<Uuid, usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                feed_tx,
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to change events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.feed_tx.subscribe()
    }

    /// Number of live change-feed receivers.
    pub fn listener_count(&self) -> usize {
        self.inner.feed_tx.receiver_count()
    }

    /// Publish a change. Having no listeners is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        trace!("publish {:?}", event);
        let _ = self.inner.feed_tx.send(event);
    }

    /// Count a new gateway connection. Returns true when this is the user's
    /// first open connection.
    pub async fn user_online(&self, user_id: Uuid) -> bool {
        let mut online = self.inner.online_users.write().await;
        let count = online.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a gateway connection. Returns true when the user has none left.
    pub async fn user_offline(&self, user_id: Uuid) -> bool {
        let mut online = self.inner.online_users.write().await;
        match online.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                online.remove(&user_id);
                true
            }
            None => false,
        }
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.keys().copied().collect()
    }
}
