//! Hash map aliases backed by `ahash`.

/// A `HashMap` using `ahash`.
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

