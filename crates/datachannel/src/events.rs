//! Event subscriber lists
//!
//! Lists live inside a resource's lock-protected state. Delivery takes a
//! snapshot under the lock and invokes the handlers after releasing it, so a
//! handler may freely subscribe, unsubscribe or dispose.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscription, returned by every `on_*` method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscribed event handler
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

pub(crate) struct Subscribers<A: ?Sized> {
    entries: Vec<(SubscriptionId, Handler<A>)>,
}

impl<A: ?Sized> Default for Subscribers<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<A: ?Sized> Subscribers<A> {
    pub fn add(&mut self, handler: Handler<A>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.entries.push((id, handler));
        id
    }

    /// Returns the removed handler so it can be dropped outside the lock
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Handler<A>> {
        let position = self.entries.iter().position(|(entry, _)| *entry == id)?;
        Some(self.entries.remove(position).1)
    }

    pub fn snapshot(&self) -> Vec<Handler<A>> {
        self.entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Invokes every handler of a snapshot with `arg`
pub(crate) fn emit<A: ?Sized>(handlers: Vec<Handler<A>>, arg: &A) {
    for handler in handlers {
        handler(arg);
    }
}

/// Type-erased removal result, dropped by the caller after unlocking
pub(crate) type Removed = Option<Box<dyn std::any::Any + Send>>;

/// Tries `remove` on each list in turn
macro_rules! remove_from {
    ($id:expr; $($list:expr),+ $(,)?) => {{
        let mut removed: $crate::events::Removed = None;
        $(
            if removed.is_none() {
                if let Some(handler) = $list.remove($id) {
                    removed = Some(Box::new(handler));
                }
            }
        )+
        removed
    }};
}
pub(crate) use remove_from;
