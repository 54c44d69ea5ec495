//! Handler registration and reply correlation.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use super::Session;
use crate::update::{Kind, Update};

/// Reacts to incoming updates. Handlers may send through the session.
pub trait Handler {
    fn handle(&mut self, session: &mut Session, update: &Update);
}

impl<F> Handler for F
where
    F: FnMut(&mut Session, &Update),
{
    fn handle(&mut self, session: &mut Session, update: &Update) {
        self(session, update)
    }
}

/// What a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Kind(Kind),
    /// Every update, after the kind-specific routing.
    Any,
    /// Every failure, after the kind-specific routing.
    Failure,
}

impl From<Kind> for Selector {
    fn from(kind: Kind) -> Self {
        Selector::Kind(kind)
    }
}

/// One-shot continuation receiving the original outbound update and the reply.
pub type Callback = Box<dyn FnOnce(&mut Session, &Update, &Update)>;

#[derive(Default)]
pub struct HandlerRegistry {
    kinds: HashMap<Kind, Vec<Box<dyn Handler>>>,
    any: Vec<Box<dyn Handler>>,
    failures: Vec<Box<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds.iter().map(|(k, v)| (*k, v.len())).collect::<Vec<_>>())
            .field("any", &self.any.len())
            .field("failures", &self.failures.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn add(&mut self, selector: Selector, handler: Box<dyn Handler>) {
        match selector {
            Selector::Kind(kind) => self.kinds.entry(kind).or_default().push(handler),
            Selector::Any => self.any.push(handler),
            Selector::Failure => self.failures.push(handler),
        }
    }

    /// Run the handlers for `update`'s kind, in registration order.
    pub(crate) fn run_kind(&mut self, session: &mut Session, update: &Update) {
        if let Some(handlers) = self.kinds.get_mut(&update.kind()) {
            for handler in handlers.iter_mut() {
                handler.handle(session, update);
            }
        }
    }

    /// Run the wildcard handlers that apply to `update`.
    pub(crate) fn run_wildcards(&mut self, session: &mut Session, update: &Update) {
        for handler in self.any.iter_mut() {
            handler.handle(session, update);
        }
        if update.is_failure() {
            for handler in self.failures.iter_mut() {
                handler.handle(session, update);
            }
        }
    }
}

struct Pending {
    origin: Update,
    callback: Callback,
}

/// Callbacks awaiting the reply to an outbound update, keyed by its id.
#[derive(Default)]
pub(crate) struct CallbackTable {
    pending: HashMap<u64, Pending>,
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.pending.keys().collect();
        ids.sort();
        f.debug_struct("CallbackTable").field("pending", &ids).finish()
    }
}

impl CallbackTable {
    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn insert(&mut self, origin: Update, callback: Callback) {
        if let Some(id) = origin.id() {
            self.pending.insert(id, Pending { origin, callback });
        }
    }

    /// Remove the entry a reply correlates to. Removal is what makes each
    /// callback fire at most once.
    pub fn take(&mut self, id: u64) -> Option<(Update, Callback)> {
        self.pending.remove(&id).map(|p| (p.origin, p.callback))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Recently sent updates without a callback, so failures can name their origin.
#[derive(Debug)]
pub(crate) struct OriginMemo {
    capacity: usize,
    order: VecDeque<u64>,
    sent: HashMap<u64, Update>,
}

impl OriginMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            sent: HashMap::new(),
        }
    }

    pub fn remember(&mut self, update: &Update) {
        let Some(id) = update.id() else { return };
        if self.capacity == 0 {
            return;
        }
        if self.sent.insert(id, update.clone()).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.sent.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&Update> {
        self.sent.get(&id)
    }
}
