//! Dictionaries shared between activities.
//!
//! Instance variables of an object live in one [`SharedDictionary`] per scope,
//! chained through `next`. All access goes through the dictionary's
//! reservation: exactly one activity holds it at a time, re-entrantly.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::config::PoolConfig;
use crate::gc::Trace;
use crate::rt::{ActivityId, Reservation, ReservationGuard, ReservationState};
use crate::util::lock;
use crate::val::Val;

use super::dictionary::VariableDictionary;

pub type DictRef = Arc<SharedDictionary>;

pub struct SharedDictionary {
    scope: Option<Val>,
    reservation: Reservation,
    dict: Mutex<VariableDictionary>,
    next: Option<DictRef>,
}

impl SharedDictionary {
    pub fn new(dict: VariableDictionary, next: Option<DictRef>) -> Self {
        Self {
            scope: dict.scope().cloned(),
            reservation: Reservation::new(),
            dict: Mutex::new(dict),
            next,
        }
    }

    pub fn scope(&self) -> Option<&Val> {
        self.scope.as_ref()
    }

    pub fn next(&self) -> Option<&DictRef> {
        self.next.as_ref()
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// Block until `activity` holds this dictionary.
    pub fn reserve(&self, activity: ActivityId) -> Result<()> {
        self.reservation.reserve(activity)
    }

    pub async fn reserve_async(&self, activity: ActivityId) -> Result<()> {
        self.reservation.reserve_async(activity).await
    }

    pub fn release(&self, activity: ActivityId) -> Result<()> {
        self.reservation.release(activity)
    }

    pub fn state(&self) -> ReservationState {
        self.reservation.state()
    }

    /// Reserve for `activity`; the reservation is released when the returned
    /// access is dropped.
    pub fn access(&self, activity: ActivityId) -> Result<ScopeAccess<'_>> {
        let guard = self.reservation.access(activity)?;
        Ok(ScopeAccess { shared: self, guard })
    }

    /// Run `f` on the dictionary. Callers that share the dictionary must hold
    /// its reservation; `f` must not re-enter `with` on the same dictionary.
    pub fn with<R>(&self, f: impl FnOnce(&mut VariableDictionary) -> R) -> R {
        f(&mut lock(&self.dict))
    }

    pub fn mark_live(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        lock(&self.dict).mark_live(visit);
        if let Some(next) = &self.next {
            visit(next);
        }
    }
}

impl Trace for DictRef {
    fn heap_addr(&self) -> Option<usize> {
        Some(Arc::as_ptr(self) as *const () as usize)
    }

    fn trace(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        self.mark_live(visit);
    }
}

impl std::fmt::Debug for SharedDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDictionary")
            .field("scope", &self.scope)
            .field("reservation", &self.reservation.state())
            .finish()
    }
}

/// Reserved access to a shared dictionary.
pub struct ScopeAccess<'a> {
    shared: &'a SharedDictionary,
    guard: ReservationGuard<'a>,
}

impl ScopeAccess<'_> {
    pub fn activity(&self) -> ActivityId {
        self.guard.activity()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut VariableDictionary) -> R) -> R {
        self.shared.with(f)
    }
}

/// Per-object chain of scope dictionaries.
#[derive(Default)]
pub struct ObjectVariables {
    head: Mutex<Option<DictRef>>,
}

impl ObjectVariables {
    pub fn new() -> Self {
        Self { head: Mutex::new(None) }
    }

    /// Dictionary of `scope`, found by walking the chain.
    pub fn find(&self, scope: &Val) -> Option<DictRef> {
        let mut cursor = lock(&self.head).clone();
        while let Some(dict) = cursor {
            if dict.scope().is_some_and(|owner| owner.is_same(scope)) {
                return Some(dict);
            }
            cursor = dict.next().cloned();
        }
        None
    }

    /// Dictionary of `scope`, linking a new one at the head of the chain if missing.
    pub fn get_or_create(&self, scope: &Val, config: &PoolConfig) -> DictRef {
        let mut head = lock(&self.head);
        let mut cursor = head.clone();
        while let Some(dict) = cursor {
            if dict.scope().is_some_and(|owner| owner.is_same(scope)) {
                return dict;
            }
            cursor = dict.next().cloned();
        }
        let dict = Arc::new(SharedDictionary::new(
            VariableDictionary::for_scope(scope.clone(), config),
            head.take(),
        ));
        *head = Some(dict.clone());
        dict
    }

    /// Every dictionary, head first.
    pub fn dictionaries(&self) -> Vec<DictRef> {
        let mut out = Vec::new();
        let mut cursor = lock(&self.head).clone();
        while let Some(dict) = cursor {
            cursor = dict.next().cloned();
            out.push(dict);
        }
        out
    }

    pub fn mark_live(&self, visit: &mut dyn FnMut(&dyn Trace)) {
        let head = lock(&self.head).clone();
        if let Some(head) = head {
            visit(&head);
        }
    }

    pub(crate) fn set_head(&self, head: Option<DictRef>) {
        *lock(&self.head) = head;
    }
}
