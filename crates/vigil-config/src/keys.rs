// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Interned key types identifying groups, commands, and isolation pools.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use ahash::AHashSet;

fn interner() -> &'static RwLock<AHashSet<Arc<str>>> {
    static INTERNER: OnceLock<RwLock<AHashSet<Arc<str>>>> = OnceLock::new();
    INTERNER.get_or_init(|| RwLock::new(AHashSet::new()))
}

fn intern(name: &str) -> Arc<str> {
    if let Some(existing) = interner()
        .read()
        .expect("key interner poisoned")
        .get(name)
    {
        return Arc::clone(existing);
    }
    let mut table = interner().write().expect("key interner poisoned");
    if let Some(existing) = table.get(name) {
        return Arc::clone(existing);
    }
    let arc: Arc<str> = Arc::from(name);
    let _ = table.insert(Arc::clone(&arc));
    arc
}

macro_rules! interned_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Interns `name`, returning a cheap-to-clone handle equal to any
            /// other key constructed from the same string.
            #[must_use]
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(intern(name.as_ref()))
            }

            /// Borrows the key's underlying name.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.as_str() == other.as_str()
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.as_str().hash(state);
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self::new(name)
            }
        }
    };
}

interned_key!(
    /// The logical owner of one or more commands, e.g. `"BillingService"`.
    GroupKey
);

interned_key!(
    /// One logical dependency call, e.g. `"GetInvoice"`. Expected to be
    /// unique across the whole process, not just within a group: command
    /// state is registered by this key alone, so two different groups
    /// reusing the same command name share one entry.
    CommandKey
);

interned_key!(
    /// Identifies an isolation pool. Defaults to the owning [`GroupKey`]'s name.
    PoolKey
);

impl PoolKey {
    /// The pool key used when a command does not declare its own pool:
    /// the group's name.
    #[must_use]
    pub fn from_group(group: &GroupKey) -> Self {
        Self::new(group.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_by_name_not_by_identity() {
        let a = CommandKey::new("GetInvoice");
        let b = CommandKey::new(String::from("GetInvoice"));
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0), "interning should dedupe the allocation");
    }

    #[test]
    fn distinct_names_are_distinct() {
        assert_ne!(CommandKey::new("GetInvoice"), CommandKey::new("GetAccount"));
    }

    #[test]
    fn pool_key_defaults_to_group_name() {
        let group = GroupKey::new("BillingService");
        let pool = PoolKey::from_group(&group);
        assert_eq!(pool.as_str(), "BillingService");
    }
}
