//! Field validation against static schema bounds.
//!
//! All checks are pure and run before any command reaches storage. The
//! same checks are applied to rows read back from storage, where a failure
//! means the stored data is corrupt rather than the caller's payload bad.

use crate::{FieldDef, FieldError, FieldErrorReason, Record, Schema, TenantKey, Value};

/// Check one value against its declaration.
pub fn validate_field(def: &FieldDef, value: &Value) -> Result<(), FieldError> {
    if value.is_null() {
        return if def.nullable {
            Ok(())
        } else {
            Err(FieldError::new(&def.name, FieldErrorReason::NullNotAllowed))
        };
    }

    if !value.matches_kind(def.kind) {
        return Err(FieldError::new(
            &def.name,
            FieldErrorReason::TypeMismatch {
                expected: def.kind.name(),
            },
        ));
    }

    if let Some(len) = value.byte_len() {
        if len < def.min_len {
            return Err(FieldError::new(
                &def.name,
                FieldErrorReason::TooShort { min: def.min_len },
            ));
        }
        if let Some(max) = def.max_len {
            if len > max {
                return Err(FieldError::new(&def.name, FieldErrorReason::TooLong { max }));
            }
        }
    }

    Ok(())
}

/// The tenant key must be present and non-empty.
pub fn validate_tenant(schema: &Schema, tenant: &TenantKey) -> Result<(), FieldError> {
    if tenant.is_empty() {
        return Err(FieldError::new(
            schema.tenant_column(),
            FieldErrorReason::EmptyIdentifier,
        ));
    }
    Ok(())
}

/// Validate the tenant and key material used to address one record.
///
/// Sized key fields (text, bytes) are identifiers, so an empty one is
/// rejected even when the declared minimum length is zero.
pub fn validate_key(schema: &Schema, tenant: &TenantKey, keys: &[Value]) -> Result<(), FieldError> {
    validate_tenant(schema, tenant)?;
    check_arity(schema.table(), schema.keys().len(), keys.len())?;

    for (def, value) in schema.keys().iter().zip(keys) {
        validate_field(def, value)?;
        if value.byte_len() == Some(0) {
            return Err(FieldError::new(&def.name, FieldErrorReason::EmptyIdentifier));
        }
    }
    Ok(())
}

/// Validate a full record before insert, upsert or update.
pub fn validate_record(schema: &Schema, record: &Record) -> Result<(), FieldError> {
    validate_key(schema, &record.tenant, &record.keys)?;
    check_arity(schema.table(), schema.values().len(), record.values.len())?;

    for (def, value) in schema.values().iter().zip(&record.values) {
        validate_field(def, value)?;
    }
    Ok(())
}

fn check_arity(field: &str, expected: usize, got: usize) -> Result<(), FieldError> {
    if expected != got {
        return Err(FieldError::new(
            field,
            FieldErrorReason::ArityMismatch { expected, got },
        ));
    }
    Ok(())
}
