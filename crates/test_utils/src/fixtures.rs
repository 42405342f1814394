//! Pre-built Test Fixtures
//!
//! Ready-to-use, predictable test data for the inventory domain.

use chrono::{DateTime, TimeZone, Utc};
use core_kernel::{ItemId, LocationId, Quantity, TenantId};
use domain_inventory::BalanceKey;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Fixture for quantities
pub struct QuantityFixtures;

impl QuantityFixtures {
    /// Whole units
    pub fn units(value: i64) -> Quantity {
        Quantity::from_i64(value)
    }

    /// A quantity using all six fractional digits
    pub fn fractional() -> Quantity {
        Quantity::new(dec!(2.345678))
    }

    /// The smallest representable quantity
    pub fn epsilon() -> Quantity {
        Quantity::new(dec!(0.000001))
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Standard business timestamp (Jan 15, 2024 09:00 UTC)
    pub fn business_day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).single().unwrap_or_default()
    }

    /// One hour after `business_day`
    pub fn later_same_day() -> DateTime<Utc> {
        Self::business_day() + chrono::Duration::hours(1)
    }

    /// One day after `business_day`, for expiry tests
    pub fn next_day() -> DateTime<Utc> {
        Self::business_day() + chrono::Duration::days(1)
    }
}

/// Fixture for identifiers that must stay stable across a test run
pub struct IdFixtures;

impl IdFixtures {
    pub fn tenant_id() -> TenantId {
        TenantId::from(Uuid::from_u128(0x0100_0000_0000_7000_8000_0000_0000_0001))
    }

    pub fn other_tenant_id() -> TenantId {
        TenantId::from(Uuid::from_u128(0x0100_0000_0000_7000_8000_0000_0000_0002))
    }

    pub fn staging_location() -> LocationId {
        LocationId::from(Uuid::from_u128(0x0200_0000_0000_7000_8000_0000_0000_0001))
    }

    pub fn shelf_location() -> LocationId {
        LocationId::from(Uuid::from_u128(0x0200_0000_0000_7000_8000_0000_0000_0002))
    }

    pub fn widget() -> ItemId {
        ItemId::from(Uuid::from_u128(0x0300_0000_0000_7000_8000_0000_0000_0001))
    }
}

/// Fixture for string values
pub struct StringFixtures;

impl StringFixtures {
    pub fn each() -> &'static str {
        "ea"
    }

    pub fn case() -> &'static str {
        "case"
    }

    pub fn purchase_order_ref() -> &'static str {
        "PO-2024-0001"
    }

    pub fn reason_code() -> &'static str {
        "DAMAGED"
    }
}

/// Fixture for balance keys
pub struct KeyFixtures;

impl KeyFixtures {
    /// The widget, in eaches, on the shelf
    pub fn widget_on_shelf() -> BalanceKey {
        BalanceKey::new(IdFixtures::widget(), IdFixtures::shelf_location(), StringFixtures::each())
    }

    /// The widget, in eaches, at staging
    pub fn widget_at_staging() -> BalanceKey {
        BalanceKey::new(IdFixtures::widget(), IdFixtures::staging_location(), StringFixtures::each())
    }

    /// A key no other test shares
    pub fn fresh() -> BalanceKey {
        BalanceKey::new(ItemId::new(), LocationId::new(), StringFixtures::each())
    }
}
