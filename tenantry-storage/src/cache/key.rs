//! Namespaced, tenant-scoped cache keys.
//!
//! A [`CacheKey`] can only be built from a namespace, a tenant key and the
//! record's key fields, so cache entries of different tables or tenants
//! cannot collide.

use std::sync::Arc;

use tenantry_core::{TenantKey, Value};

/// Composite cache key: namespace + tenant + business key parts.
///
/// Key parts are held in the injective byte encoding of
/// `encode_values`, so equal keys hash and compare equal regardless of
/// how the parts were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    tenant: TenantKey,
    namespace: Arc<str>,
    parts: Vec<u8>,
}

impl CacheKey {
    pub fn new(namespace: impl Into<Arc<str>>, tenant: TenantKey, keys: &[Value]) -> Self {
        let mut parts = Vec::with_capacity(keys.len() * 9);
        encode_values(&mut parts, keys);
        Self {
            inner: CacheKeyInner {
                tenant,
                namespace: namespace.into(),
                parts,
            },
        }
    }

    pub fn tenant(&self) -> TenantKey {
        self.inner.tenant
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }
}

/// Append an injective encoding of `values` to `out`.
pub(crate) fn encode_values(out: &mut Vec<u8>, values: &[Value]) {
    for value in values {
        match value {
            Value::Null => out.push(0),
            Value::Bool(b) => {
                out.push(1);
                out.push(u8::from(*b));
            }
            Value::Int(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Text(s) => {
                out.push(3);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(4);
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            Value::Uuid(u) => {
                out.push(5);
                out.extend_from_slice(u.as_bytes());
            }
            Value::Timestamp(t) => {
                out.push(6);
                out.extend_from_slice(&t.to_be_bytes());
            }
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            ".{0,8}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            any::<[u8; 16]>().prop_map(|b| Value::Uuid(uuid::Uuid::from_bytes(b))),
            any::<i64>().prop_map(Value::Timestamp),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: distinct key tuples never share an encoding.
        #[test]
        fn prop_encoding_is_injective(
            k1 in proptest::collection::vec(value_strategy(), 0..3),
            k2 in proptest::collection::vec(value_strategy(), 0..3),
        ) {
            let mut a = Vec::new();
            let mut b = Vec::new();
            encode_values(&mut a, &k1);
            encode_values(&mut b, &k2);
            if k1 == k2 {
                prop_assert_eq!(a, b);
            } else {
                prop_assert_ne!(a, b);
            }
        }
    }
}
