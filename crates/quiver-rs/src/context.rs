//! Typed context resolution for tool invocations.
//!
//! Tools often need auxiliary objects that are not model-visible parameters:
//! session handles, credentials, per-user services. A [`ContextStore`] holds
//! such objects keyed by type (plus an optional instance key), and an
//! [`ExecutionContext`] chains stores in priority order. Lookups walk the
//! chain store-by-store and the first match wins, which realizes the fixed
//! precedence per-call > per-agent > toolkit default. An optional
//! [`ContextProvider`] fallback is the explicit last link in the chain and
//! is consulted only when no store matches.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased stored value.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

type StoreKey = (TypeId, Option<String>);

// ── ContextStore ───────────────────────────────────────────────────

/// An immutable table of objects keyed by `(type, optional instance key)`.
///
/// Built once via [`ContextStore::builder`] and never mutated afterwards;
/// sharing across concurrent calls is a plain `Arc` clone.
#[derive(Default)]
pub struct ContextStore {
    entries: HashMap<StoreKey, ContextValue>,
}

impl ContextStore {
    pub fn builder() -> ContextStoreBuilder {
        ContextStoreBuilder {
            entries: HashMap::new(),
        }
    }

    /// A single-entry store. Convenience for per-call overrides.
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        Self::builder().with(value).build()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, type_id: TypeId, key: Option<&str>) -> Option<ContextValue> {
        self.entries
            .get(&(type_id, key.map(|k| k.to_string())))
            .cloned()
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Builder for a [`ContextStore`].
pub struct ContextStoreBuilder {
    entries: HashMap<StoreKey, ContextValue>,
}

impl ContextStoreBuilder {
    /// Insert a value resolvable by its type alone.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.entries
            .insert((TypeId::of::<T>(), None), Arc::new(value));
        self
    }

    /// Insert a value resolvable by type plus instance key. Use this when a
    /// call needs several objects of the same type (for example two
    /// credentials).
    pub fn with_keyed<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.entries
            .insert((TypeId::of::<T>(), Some(key.into())), Arc::new(value));
        self
    }

    /// Insert an already-shared value without re-wrapping.
    pub fn with_arc<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.entries.insert((TypeId::of::<T>(), None), value);
        self
    }

    pub fn build(self) -> ContextStore {
        ContextStore {
            entries: self.entries,
        }
    }
}

// ── Fallback provider ──────────────────────────────────────────────

/// An externally registered fallback source of context objects.
///
/// Modeled as the explicit last link of the store chain rather than an
/// out-of-band lookup, so resolution order stays auditable.
pub trait ContextProvider: Send + Sync {
    fn provide(&self, type_id: TypeId, key: Option<&str>) -> Option<ContextValue>;
}

// ── ExecutionContext ───────────────────────────────────────────────

/// An ordered chain of [`ContextStore`]s plus an optional fallback provider.
///
/// Cloning is cheap (the stores are `Arc`-shared), so a context can be
/// handed to every spawned call pipeline in a batch.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    stores: Vec<Arc<ContextStore>>,
    fallback: Option<Arc<dyn ContextProvider>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context over the given stores, earliest store wins.
    pub fn layered(stores: Vec<Arc<ContextStore>>) -> Self {
        Self {
            stores,
            fallback: None,
        }
    }

    /// A single-store context.
    pub fn of(store: ContextStore) -> Self {
        Self::layered(vec![Arc::new(store)])
    }

    /// Attach the fallback provider consulted when no store matches.
    pub fn with_fallback(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Concatenate contexts preserving relative order; earlier arguments
    /// take priority. The first context carrying a fallback provider
    /// supplies it.
    pub fn merge(contexts: impl IntoIterator<Item = ExecutionContext>) -> Self {
        let mut stores = Vec::new();
        let mut fallback = None;
        for ctx in contexts {
            stores.extend(ctx.stores);
            if fallback.is_none() {
                fallback = ctx.fallback;
            }
        }
        Self { stores, fallback }
    }

    /// Resolve an object by type. First store with a match wins; the
    /// fallback provider is consulted only when every store misses.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve(TypeId::of::<T>(), None)
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Resolve an object by type and instance key.
    pub fn get_keyed<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.resolve(TypeId::of::<T>(), Some(key))
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    fn resolve(&self, type_id: TypeId, key: Option<&str>) -> Option<ContextValue> {
        for store in &self.stores {
            if let Some(value) = store.lookup(type_id, key) {
                return Some(value);
            }
        }
        self.fallback
            .as_ref()
            .and_then(|provider| provider.provide(type_id, key))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stores", &self.stores.len())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Session(u32);

    #[derive(Debug, PartialEq)]
    struct Credential(&'static str);

    #[test]
    fn store_lookup_by_type_and_key() {
        let store = ContextStore::builder()
            .with(Session(7))
            .with_keyed("backup", Credential("b"))
            .with_keyed("primary", Credential("a"))
            .build();
        let ctx = ExecutionContext::of(store);

        assert_eq!(ctx.get::<Session>().unwrap().0, 7);
        assert_eq!(ctx.get_keyed::<Credential>("primary").unwrap().0, "a");
        assert_eq!(ctx.get_keyed::<Credential>("backup").unwrap().0, "b");
        assert!(ctx.get::<Credential>().is_none(), "keyed entries are not keyless");
    }

    #[test]
    fn earlier_store_wins() {
        let call = Arc::new(ContextStore::of(Session(1)));
        let default = Arc::new(ContextStore::of(Session(2)));
        let ctx = ExecutionContext::layered(vec![call, default]);
        assert_eq!(ctx.get::<Session>().unwrap().0, 1);
    }

    #[test]
    fn merge_preserves_priority() {
        let call = ExecutionContext::of(ContextStore::of(Session(1)));
        let agent = ExecutionContext::of(
            ContextStore::builder()
                .with(Session(2))
                .with(Credential("agent"))
                .build(),
        );
        let merged = ExecutionContext::merge([call, agent]);

        assert_eq!(merged.get::<Session>().unwrap().0, 1);
        assert_eq!(merged.get::<Credential>().unwrap().0, "agent");
    }

    struct StaticProvider;

    impl ContextProvider for StaticProvider {
        fn provide(&self, type_id: TypeId, _key: Option<&str>) -> Option<ContextValue> {
            (type_id == TypeId::of::<Credential>())
                .then(|| Arc::new(Credential("fallback")) as ContextValue)
        }
    }

    #[test]
    fn fallback_consulted_last() {
        let ctx = ExecutionContext::of(ContextStore::of(Session(1)))
            .with_fallback(Arc::new(StaticProvider));

        // The store chain misses Credential, the provider supplies it.
        assert_eq!(ctx.get::<Credential>().unwrap().0, "fallback");

        // A store match short-circuits before the provider.
        let ctx = ExecutionContext::merge([
            ExecutionContext::of(ContextStore::of(Credential("store"))),
            ctx,
        ]);
        assert_eq!(ctx.get::<Credential>().unwrap().0, "store");
    }

    #[test]
    fn merge_keeps_first_fallback() {
        let with_fb = ExecutionContext::new().with_fallback(Arc::new(StaticProvider));
        let merged = ExecutionContext::merge([ExecutionContext::new(), with_fb]);
        assert_eq!(merged.get::<Credential>().unwrap().0, "fallback");
    }
}
