use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

pub type Map<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type Set<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;
