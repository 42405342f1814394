//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::quantity::QuantityError;
use core_kernel::{LocationId, Quantity};
use std::error::Error;

#[test]
fn test_core_error_from_quantity_error() {
    let core_error: CoreError = QuantityError::Overflow.into();
    assert!(matches!(core_error, CoreError::Quantity(QuantityError::Overflow)));
}

#[test]
fn test_quantity_parse_error_converts() {
    fn parse(raw: &str) -> Result<Quantity, CoreError> {
        Ok(Quantity::parse(raw)?)
    }

    let err = parse("twelve").unwrap_err();
    assert!(err.to_string().starts_with("Quantity error"));
}

#[test]
fn test_invalid_identifier_keeps_uuid_source() {
    let err = "LOC-123".parse::<LocationId>().unwrap_err();

    match &err {
        CoreError::InvalidIdentifier { kind, value, .. } => {
            assert_eq!(*kind, "LocationId");
            assert_eq!(value, "LOC-123");
        }
        other => panic!("Expected InvalidIdentifier, got {:?}", other),
    }
    assert!(err.source().is_some());
}
