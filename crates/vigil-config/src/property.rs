// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Generic read-through, chainable property handles.

use std::sync::Arc;

/// A read-through handle producing a value on demand.
///
/// Supports chaining: [`Property::chained`] builds a handle that tries each
/// link in order and returns the first that produces a value, falling
/// through to later links (commonly a command-level override, then a
/// group-level override, then a hard default). Nothing is cached — each
/// [`Property::get`] re-evaluates the chain, which is what lets dynamic
/// configuration take effect without a restart.
#[derive(Clone)]
pub struct Property<T> {
    read: Arc<dyn Fn() -> Option<T> + Send + Sync>,
}

impl<T> Property<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A property that always returns `value`.
    #[must_use]
    pub fn constant(value: T) -> Self {
        Self {
            read: Arc::new(move || Some(value.clone())),
        }
    }

    /// A property backed by an arbitrary read function.
    #[must_use]
    pub fn from_fn(read: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            read: Arc::new(read),
        }
    }

    /// Chains properties in priority order: the first link to produce
    /// `Some` wins. An empty chain always returns `None`.
    #[must_use]
    pub fn chained(links: Vec<Property<T>>) -> Self {
        Self {
            read: Arc::new(move || links.iter().find_map(Property::get)),
        }
    }

    /// Reads the current value, if any link in the chain has one.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        (self.read)()
    }

    /// Reads the current value, falling back to `default` if nothing in
    /// the chain produced one.
    #[must_use]
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }
}

impl<T> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Property(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn first_non_null_wins() {
        let child = Property::from_fn(|| None::<u64>);
        let parent = Property::from_fn(|| Some(42u64));
        let chained = Property::chained(vec![child, parent]);
        assert_eq!(chained.get(), Some(42));
    }

    #[test]
    fn empty_chain_is_none() {
        let chained: Property<u64> = Property::chained(vec![]);
        assert_eq!(chained.get(), None);
    }

    #[test]
    fn re_evaluates_on_every_read() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);
        let prop = Property::from_fn(move || Some(flag2.load(Ordering::SeqCst)));
        assert_eq!(prop.get(), Some(false));
        flag.store(true, Ordering::SeqCst);
        assert_eq!(prop.get(), Some(true));
    }
}
