// lifecycle.rs — resource accounting.
//
// Every device handle the pipeline creates (program, kernels, memory objects)
// is wrapped in a `Tracked<T>` obtained from a `ResourceLedger`. The wrapper
// derefs to the handle and records the release when dropped, so:
//
//   created(class) − released(class) == live(class)
//
// holds at every point, including after an early `?` return in the middle of
// allocation: the partially filled Vec<Tracked<_>> is dropped and each entry
// it holds is released once.
//
// The ledger is a cheap `Clone` handle around shared atomic counters so
// tracked values can outlive the function that created them.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

/// Resource class counted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Program,
    Kernel,
    Memory,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [ResourceClass::Program, ResourceClass::Kernel, ResourceClass::Memory];

    fn slot(self) -> usize {
        match self {
            ResourceClass::Program => 0,
            ResourceClass::Kernel => 1,
            ResourceClass::Memory => 2,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Program => write!(f, "program"),
            ResourceClass::Kernel => write!(f, "kernel"),
            ResourceClass::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    created: [AtomicUsize; 3],
    released: [AtomicUsize; 3],
}

/// Shared created/released counters per [`ResourceClass`].
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<Counters>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a freshly created handle.
    pub fn track<T>(&self, class: ResourceClass, label: impl Into<String>, value: T) -> Tracked<T> {
        self.counters.created[class.slot()].fetch_add(1, Ordering::Relaxed);
        Tracked { value, class, label: label.into(), ledger: self.clone() }
    }

    pub fn created(&self, class: ResourceClass) -> usize {
        self.counters.created[class.slot()].load(Ordering::Relaxed)
    }

    pub fn released(&self, class: ResourceClass) -> usize {
        self.counters.released[class.slot()].load(Ordering::Relaxed)
    }

    pub fn live(&self, class: ResourceClass) -> usize {
        self.created(class) - self.released(class)
    }

    /// Live handles across every class.
    pub fn live_total(&self) -> usize {
        ResourceClass::ALL.into_iter().map(|c| self.live(c)).sum()
    }

    fn release(&self, class: ResourceClass, label: &str) {
        self.counters.released[class.slot()].fetch_add(1, Ordering::Relaxed);
        trace!(%class, label, "released");
    }
}

/// A device handle whose release is recorded in a [`ResourceLedger`].
pub struct Tracked<T> {
    value: T,
    class: ResourceClass,
    label: String,
    ledger: ResourceLedger,
}

impl<T> Tracked<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger.release(self.class, &self.label);
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("class", &self.class)
            .field("label", &self.label)
            .field("value", &self.value)
            .finish()
    }
}
