//! Stanza and timed handler registries.
//!
//! Handlers live in an arena keyed by id. The *active* list is what the
//! dispatcher and the idle loop iterate; additions and removals are staged
//! in pending lists and only applied at reconciliation points:
//!
//! - stanza handlers at the start of every inbound body
//! - timed handlers at the start of every idle tick
//!
//! Reconciliation applies additions before removals, so a handler added and
//! deleted between two reconciliation points never becomes active.
//!
//! While a callback runs, it is taken out of its arena slot and handed back
//! afterwards. A callback can therefore receive `&mut Connection` and add or
//! delete handlers, including itself, without aliasing the registry.
//! Clearing a registry bumps its generation so a dispatcher holding a stale
//! active snapshot can tell that its survivors no longer exist.

use std::{collections::HashMap, fmt, time::Duration};

use parley_proto::{Element, jid};

/// Opaque reference to a stanza handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Opaque reference to a timed handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimedHandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

impl fmt::Display for TimedHandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed#{}", self.0)
    }
}

/// Stanza matching criteria.
///
/// Every criterion left unset matches anything. The namespace criterion
/// matches the stanza's own `xmlns` or the `xmlns` of any immediate child,
/// which makes `iq/query` style matching a one-liner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    namespace: Option<String>,
    name: Option<String>,
    stanza_type: Option<String>,
    id: Option<String>,
    from: Option<String>,
    match_bare: bool,
}

impl Matcher {
    /// Matcher that accepts every stanza
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a namespace on the stanza or one of its immediate children
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Require a tag name (case-insensitive)
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require a `type` attribute
    #[must_use]
    pub fn stanza_type(mut self, stanza_type: impl Into<String>) -> Self {
        self.stanza_type = Some(stanza_type.into());
        self
    }

    /// Require an `id` attribute
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Require a `from` attribute, compared as a full JID
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Compare `from` as bare JIDs on both sides
    #[must_use]
    pub fn match_bare(mut self, match_bare: bool) -> Self {
        self.match_bare = match_bare;
        self
    }

    /// Test a stanza against every criterion
    #[must_use]
    pub fn matches(&self, stanza: &Element) -> bool {
        self.namespace_matches(stanza)
            && self.name.as_deref().is_none_or(|name| stanza.is_named(name))
            && self.stanza_type.as_deref().is_none_or(|kind| stanza.attr("type") == Some(kind))
            && self.id.as_deref().is_none_or(|id| stanza.attr("id") == Some(id))
            && self.from_matches(stanza)
    }

    fn namespace_matches(&self, stanza: &Element) -> bool {
        let Some(namespace) = self.namespace.as_deref() else {
            return true;
        };
        stanza.xmlns() == Some(namespace)
            || stanza.children().any(|child| child.xmlns() == Some(namespace))
    }

    fn from_matches(&self, stanza: &Element) -> bool {
        let Some(expected) = self.from.as_deref() else {
            return true;
        };
        let Some(actual) = stanza.attr("from") else {
            return false;
        };
        if self.match_bare { jid::bare(actual) == jid::bare(expected) } else { actual == expected }
    }
}

/// A registered stanza handler
struct Handler<F> {
    matcher: Matcher,
    system: bool,
    callback: Option<F>,
}

/// Stanza handler arena with staged mutation.
pub struct Handlers<F> {
    store: HashMap<HandlerId, Handler<F>>,
    active: Vec<HandlerId>,
    pending_add: Vec<HandlerId>,
    pending_remove: Vec<HandlerId>,
    next_id: u64,
    generation: u64,
}

impl<F> Handlers<F> {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: HashMap::new(),
            active: Vec::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            next_id: 0,
            generation: 0,
        }
    }

    /// Stage a handler for addition; it becomes active at the next
    /// [`reconcile`](Self::reconcile)
    pub fn add(&mut self, matcher: Matcher, system: bool, callback: F) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.store.insert(id, Handler { matcher, system, callback: Some(callback) });
        self.pending_add.push(id);
        id
    }

    /// Stage a handler for removal
    pub fn remove(&mut self, id: HandlerId) {
        self.pending_remove.push(id);
    }

    /// Apply staged additions, then staged removals
    pub fn reconcile(&mut self) {
        self.active.append(&mut self.pending_add);
        for id in std::mem::take(&mut self.pending_remove) {
            self.active.retain(|active| *active != id);
            self.store.remove(&id);
        }
    }

    /// Snapshot of the active list
    #[must_use]
    pub fn active(&self) -> Vec<HandlerId> {
        self.active.clone()
    }

    /// Replace the active list after a dispatch pass.
    ///
    /// Ids missing from `survivors` are dropped from the arena unless they
    /// are still staged for addition.
    pub fn retain_active(&mut self, survivors: Vec<HandlerId>) {
        for id in &self.active {
            if !survivors.contains(id) && !self.pending_add.contains(id) {
                self.store.remove(id);
            }
        }
        self.active = survivors;
    }

    /// True if the handler's criteria match and it may run now
    #[must_use]
    pub fn is_eligible(&self, id: HandlerId, stanza: &Element, authenticated: bool) -> bool {
        self.store.get(&id).is_some_and(|handler| {
            (authenticated || handler.system) && handler.matcher.matches(stanza)
        })
    }

    /// Take the callback out for invocation
    pub fn take_callback(&mut self, id: HandlerId) -> Option<F> {
        self.store.get_mut(&id).and_then(|handler| handler.callback.take())
    }

    /// Hand a callback back after invocation; dropped if the handler is gone
    pub fn restore_callback(&mut self, id: HandlerId, callback: F) {
        if let Some(handler) = self.store.get_mut(&id) {
            handler.callback = Some(callback);
        }
    }

    /// Drop every handler, active and staged
    pub fn clear(&mut self) {
        self.store.clear();
        self.active.clear();
        self.pending_add.clear();
        self.pending_remove.clear();
        self.generation += 1;
    }

    /// Changes whenever the registry is cleared
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of active handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True if no handler is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// True if the handler exists (active or staged)
    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.store.contains_key(&id)
    }
}

impl<F> Default for Handlers<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered timed handler
struct TimedHandler<F, I> {
    period: Duration,
    last_fired: I,
    system: bool,
    callback: Option<F>,
}

/// Timed handler arena with staged mutation.
pub struct TimedHandlers<F, I> {
    store: HashMap<TimedHandlerId, TimedHandler<F, I>>,
    active: Vec<TimedHandlerId>,
    pending_add: Vec<TimedHandlerId>,
    pending_remove: Vec<TimedHandlerId>,
    next_id: u64,
    generation: u64,
}

impl<F, I> TimedHandlers<F, I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: HashMap::new(),
            active: Vec::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            next_id: 0,
            generation: 0,
        }
    }

    /// Stage a handler firing every `period`, counted from `now`
    pub fn add(&mut self, period: Duration, system: bool, now: I, callback: F) -> TimedHandlerId {
        self.next_id += 1;
        let id = TimedHandlerId(self.next_id);
        let handler = TimedHandler { period, last_fired: now, system, callback: Some(callback) };
        self.store.insert(id, handler);
        self.pending_add.push(id);
        id
    }

    /// Stage a handler for removal
    pub fn remove(&mut self, id: TimedHandlerId) {
        self.pending_remove.push(id);
    }

    /// Apply staged additions, then staged removals
    pub fn reconcile(&mut self) {
        self.active.append(&mut self.pending_add);
        for id in std::mem::take(&mut self.pending_remove) {
            self.active.retain(|active| *active != id);
            self.store.remove(&id);
        }
    }

    /// Snapshot of the active list
    #[must_use]
    pub fn active(&self) -> Vec<TimedHandlerId> {
        self.active.clone()
    }

    /// Replace the active list after an idle pass
    pub fn retain_active(&mut self, survivors: Vec<TimedHandlerId>) {
        for id in &self.active {
            if !survivors.contains(id) && !self.pending_add.contains(id) {
                self.store.remove(id);
            }
        }
        self.active = survivors;
    }

    /// True if the handler may run now (system, or the session is
    /// authenticated)
    #[must_use]
    pub fn is_eligible(&self, id: TimedHandlerId, authenticated: bool) -> bool {
        self.store.get(&id).is_some_and(|handler| authenticated || handler.system)
    }

    /// True if a full period has passed since the handler last fired
    #[must_use]
    pub fn is_due(&self, id: TimedHandlerId, now: I) -> bool {
        self.store.get(&id).is_some_and(|handler| handler.last_fired + handler.period <= now)
    }

    /// Take the callback out for invocation and record the firing time
    pub fn take_callback(&mut self, id: TimedHandlerId, now: I) -> Option<F> {
        let handler = self.store.get_mut(&id)?;
        handler.last_fired = now;
        handler.callback.take()
    }

    /// Hand a callback back after invocation; dropped if the handler is gone
    pub fn restore_callback(&mut self, id: TimedHandlerId, callback: F) {
        if let Some(handler) = self.store.get_mut(&id) {
            handler.callback = Some(callback);
        }
    }

    /// Drop every handler, active and staged
    pub fn clear(&mut self) {
        self.store.clear();
        self.active.clear();
        self.pending_add.clear();
        self.pending_remove.clear();
        self.generation += 1;
    }

    /// Changes whenever the registry is cleared
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of active handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True if no handler is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// True if the handler exists (active or staged)
    #[must_use]
    pub fn contains(&self, id: TimedHandlerId) -> bool {
        self.store.contains_key(&id)
    }
}

impl<F, I> Default for TimedHandlers<F, I>
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I>,
{
    fn default() -> Self {
        Self::new()
    }
}
