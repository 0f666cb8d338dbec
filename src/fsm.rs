//! A small, generic state/event dispatcher.
//!
//! The handler table is assembled once through [`StateMachineBuilder`] and frozen by
//! [`StateMachineBuilder::build`]. Events are dispatched with [`StateMachine::operate`], which
//! runs the handler registered for the current state while holding the dispatch lock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;

type Handler<S, E, C> = Box<dyn Fn(&StateMachine<S, E, C>, &C) + Send + Sync>;
type Observer<S> = Box<dyn Fn(S, S) + Send + Sync>;

pub struct StateMachineBuilder<S, E, C> {
    initial: S,
    handlers: HashMap<S, HashMap<E, Handler<S, E, C>>>,
}

impl<S, E, C> StateMachineBuilder<S, E, C>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` to run when `event` is delivered while the machine is in `state`.
    ///
    /// # Panics
    ///
    /// Panics if a handler is already registered for the same `(state, event)` pair. A
    /// duplicate is a wiring defect and must be caught while the machine is being assembled.
    pub fn on<F>(mut self, state: S, event: E, handler: F) -> Self
    where
        F: Fn(&StateMachine<S, E, C>, &C) + Send + Sync + 'static,
    {
        let events = self.handlers.entry(state).or_default();
        if events.contains_key(&event) {
            panic!("set twice for state({state:?}) event({event:?})");
        }
        events.insert(event, Box::new(handler));
        self
    }

    pub fn build(self) -> StateMachine<S, E, C> {
        StateMachine {
            state: Mutex::new(self.initial),
            dispatch: Mutex::new(()),
            handlers: self.handlers,
            observer: Mutex::new(None),
        }
    }
}

pub struct StateMachine<S, E, C> {
    state: Mutex<S>,
    dispatch: Mutex<()>,
    handlers: HashMap<S, HashMap<E, Handler<S, E, C>>>,
    observer: Mutex<Option<Observer<S>>>,
}

impl<S, E, C> StateMachine<S, E, C>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn current_state(&self) -> S {
        *self.state.lock()
    }

    /// Overwrites the current state.
    ///
    /// The observer, if any, is called with `(old, new)` before the new state is stored and
    /// while the state lock is held, so it must not call back into the machine.
    pub fn set_state(&self, new_state: S) {
        let mut state = self.state.lock();
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(*state, new_state);
        }
        *state = new_state;
    }

    /// Dispatches `event` against the current state and returns the state afterwards.
    ///
    /// Unknown `(state, event)` pairs are ignored. Handlers run under the dispatch lock: they
    /// may call [`StateMachine::set_state`] but must never call `operate` inline.
    pub fn operate(&self, ctx: &C, event: E) -> S {
        let _dispatch = self.dispatch.lock();
        let current = self.current_state();
        match self.handlers.get(&current).and_then(|events| events.get(&event)) {
            Some(handler) => {
                handler(self, ctx);
                self.current_state()
            }
            None => current,
        }
    }

    /// Installs the state-change observer, replacing the previous one.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(S, S) + Send + Sync + 'static,
    {
        *self.observer.lock() = Some(Box::new(observer));
    }

    pub fn clear_observer(&self) {
        *self.observer.lock() = None;
    }

    pub fn handles(&self, state: S, event: E) -> bool {
        self.handlers
            .get(&state)
            .map(|events| events.contains_key(&event))
            .unwrap_or(false)
    }
}

impl<S, E, C> Debug for StateMachine<S, E, C>
where
    S: Copy + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &*self.state.lock())
            .field("states_with_handlers", &self.handlers.len())
            .finish()
    }
}
