use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

/// Stable serialization of raw inputs: object keys sorted at every depth, so
/// `{a, b}` and `{b, a}` share one cache slot.
pub fn canonical_key(raw: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_object(raw, &mut out);
    out
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(&map[key], out);
    }
    out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Bounded map of validated results with insertion-order eviction.
///
/// A hit does not refresh an entry's position; the oldest insert is always
/// the first to go.
#[derive(Debug)]
pub struct ValidationCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Value>,
}

impl ValidationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Deep copy of the cached value, so callers can never mutate the cache.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: Value) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn key_ignores_key_order_at_every_depth() {
        let a = map(json!({"b": 1, "a": {"y": [1, {"q": 1, "p": 2}], "x": null}}));
        let b = map(json!({"a": {"x": null, "y": [1, {"p": 2, "q": 1}]}, "b": 1}));
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn key_distinguishes_values_and_array_order() {
        let a = map(json!({"options": ["a", "b"]}));
        let b = map(json!({"options": ["b", "a"]}));
        let c = map(json!({"options": "a,b"}));
        assert_ne!(canonical_key(&a), canonical_key(&b));
        assert_ne!(canonical_key(&a), canonical_key(&c));
    }

    #[test]
    fn evicts_in_insertion_order_not_lru() {
        let mut cache = ValidationCache::new(2);
        cache.insert("first".into(), json!(1));
        cache.insert("second".into(), json!(2));
        // A read does not protect "first" from eviction.
        assert_eq!(cache.get("first"), Some(json!(1)));
        cache.insert("third".into(), json!(3));

        assert_eq!(cache.get("first"), None);
        assert_eq!(cache.get("second"), Some(json!(2)));
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = ValidationCache::new(DEFAULT_CACHE_CAPACITY);
        for i in 0..(DEFAULT_CACHE_CAPACITY + 250) {
            cache.insert(format!("k{i}"), json!(i));
            assert!(cache.stats().size <= DEFAULT_CACHE_CAPACITY);
        }
        assert_eq!(cache.stats().size, DEFAULT_CACHE_CAPACITY);
        assert!(cache.get("k0").is_none());
        assert!(cache.get(&format!("k{}", DEFAULT_CACHE_CAPACITY + 249)).is_some());
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = ValidationCache::new(0);
        cache.insert("k".into(), json!(1));
        assert_eq!(cache.stats().size, 0);
    }
}
