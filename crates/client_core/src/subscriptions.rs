use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    token: SubscriptionToken,
    name: &'static str,
    handler: Handler<E>,
}

/// Named handlers for one event type. Registering returns a token that
/// unsubscribes exactly that handler; `clear` drops every handler at teardown.
pub struct SubscriptionRegistry<E> {
    inner: Mutex<RegistryInner<E>>,
}

struct RegistryInner<E> {
    next_id: u64,
    registrations: Vec<Registration<E>>,
}

impl<E> SubscriptionRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                registrations: Vec::new(),
            }),
        }
    }

    pub fn register(
        &self,
        name: &'static str,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let mut inner = self.inner.lock();
        let token = SubscriptionToken(inner.next_id);
        inner.next_id += 1;
        inner.registrations.push(Registration {
            token,
            name,
            handler: Arc::new(handler),
        });
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.registrations.len();
        inner.registrations.retain(|r| r.token != token);
        inner.registrations.len() != before
    }

    /// Calls every handler in registration order and returns how many ran.
    /// Handlers run outside the lock, so they may register or unsubscribe.
    pub fn emit(&self, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = self
            .inner
            .lock()
            .registrations
            .iter()
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.inner.lock().registrations.iter().map(|r| r.name).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.registrations.len();
        inner.registrations.clear();
        removed
    }
}

impl<E> Default for SubscriptionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
