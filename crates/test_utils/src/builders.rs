//! Test Data Builders
//!
//! Builders for service requests. Tests name only the fields they care
//! about; everything else gets a valid default from the fixtures.

use chrono::{DateTime, Utc};
use core_kernel::{ItemId, LocationId, Quantity, ReceiptId, ReceiptLineId};
use domain_inventory::{
    BalanceKey, NewAdjustment, NewAdjustmentLine, NewCount, NewCountLine, NewPutaway, NewPutawayLine, NewQcEvent,
    NewReceipt, NewReceiptLine, NewReservation, QcEventType,
};
use fake::Fake;

use crate::fixtures::{IdFixtures, KeyFixtures, StringFixtures};

/// Builder for adjustment requests
pub struct AdjustmentBuilder {
    reason: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
    external_ref: Option<String>,
    lines: Vec<NewAdjustmentLine>,
}

impl Default for AdjustmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdjustmentBuilder {
    pub fn new() -> Self {
        Self {
            reason: Some("cycle correction".to_string()),
            occurred_at: None,
            external_ref: None,
            lines: Vec::new(),
        }
    }

    /// Adds a line changing `key` by `delta`
    pub fn line(mut self, key: &BalanceKey, delta: Quantity) -> Self {
        self.lines.push(NewAdjustmentLine {
            item_id: key.item_id,
            location_id: key.location_id,
            uom: key.uom.clone(),
            quantity_delta: delta,
            reason_code: Some(StringFixtures::reason_code().to_string()),
        });
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn external_ref(mut self, reference: impl Into<String>) -> Self {
        self.external_ref = Some(reference.into());
        self
    }

    pub fn build(self) -> NewAdjustment {
        NewAdjustment {
            occurred_at: self.occurred_at,
            reason: self.reason,
            notes: None,
            external_ref: self.external_ref,
            lines: self.lines,
        }
    }
}

/// Builder for physical count requests
#[derive(Default)]
pub struct CountBuilder {
    lines: Vec<NewCountLine>,
}

impl CountBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `counted` units found at `key`
    pub fn line(mut self, key: &BalanceKey, counted: Quantity) -> Self {
        self.lines.push(NewCountLine {
            item_id: key.item_id,
            location_id: key.location_id,
            uom: key.uom.clone(),
            counted_quantity: counted,
            reason_code: None,
        });
        self
    }

    pub fn build(self) -> NewCount {
        NewCount {
            occurred_at: None,
            notes: Some("blind count".to_string()),
            lines: self.lines,
        }
    }
}

/// Builder for receipt requests
pub struct ReceiptBuilder {
    purchase_order_ref: Option<String>,
    staging_location_id: LocationId,
    lines: Vec<NewReceiptLine>,
}

impl Default for ReceiptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiptBuilder {
    pub fn new() -> Self {
        Self {
            purchase_order_ref: Some(StringFixtures::purchase_order_ref().to_string()),
            staging_location_id: IdFixtures::staging_location(),
            lines: Vec::new(),
        }
    }

    pub fn staging(mut self, location_id: LocationId) -> Self {
        self.staging_location_id = location_id;
        self
    }

    /// Adds a line receiving `quantity` eaches of `item_id`
    pub fn line(mut self, item_id: ItemId, quantity: Quantity) -> Self {
        self.lines.push(NewReceiptLine {
            item_id,
            uom: StringFixtures::each().to_string(),
            quantity_received: quantity,
        });
        self
    }

    pub fn build(self) -> NewReceipt {
        NewReceipt {
            purchase_order_ref: self.purchase_order_ref,
            staging_location_id: self.staging_location_id,
            received_at: None,
            lines: self.lines,
        }
    }
}

/// Builder for putaway requests
#[derive(Default)]
pub struct PutawayBuilder {
    receipt_id: Option<ReceiptId>,
    lines: Vec<NewPutawayLine>,
}

impl PutawayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts every line to one receipt
    pub fn for_receipt(mut self, receipt_id: ReceiptId) -> Self {
        self.receipt_id = Some(receipt_id);
        self
    }

    /// Moves `quantity` eaches of a receipt line from staging to `to`
    pub fn line(mut self, receipt_line_id: ReceiptLineId, to: LocationId, quantity: Quantity) -> Self {
        self.lines.push(NewPutawayLine {
            receipt_line_id,
            from_location_id: None,
            to_location_id: to,
            uom: StringFixtures::each().to_string(),
            quantity,
        });
        self
    }

    pub fn build(self) -> NewPutaway {
        NewPutaway {
            receipt_id: self.receipt_id,
            notes: None,
            lines: self.lines,
        }
    }
}

/// Builder for reservation requests
pub struct ReservationBuilder {
    key: BalanceKey,
    quantity: Quantity,
    demand_ref: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Default for ReservationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationBuilder {
    /// One each of the shelf widget for a random sales order line
    pub fn new() -> Self {
        let order: u32 = (1_000..100_000).fake();
        Self {
            key: KeyFixtures::widget_on_shelf(),
            quantity: Quantity::from_i64(1),
            demand_ref: format!("SO-{}/1", order),
            expires_at: None,
        }
    }

    pub fn key(mut self, key: &BalanceKey) -> Self {
        self.key = key.clone();
        self
    }

    pub fn quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn build(self) -> NewReservation {
        NewReservation {
            item_id: self.key.item_id,
            location_id: self.key.location_id,
            uom: self.key.uom,
            quantity: self.quantity,
            demand_ref: self.demand_ref,
            expires_at: self.expires_at,
        }
    }
}

/// Builds a QC event request
pub fn qc_event(receipt_line_id: ReceiptLineId, event_type: QcEventType, quantity: Quantity) -> NewQcEvent {
    NewQcEvent {
        receipt_line_id,
        event_type,
        quantity,
        actor: Some("qc-inspector".to_string()),
        notes: None,
        occurred_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_builder_produces_valid_request() {
        let key = KeyFixtures::fresh();
        let request = AdjustmentBuilder::new()
            .line(&key, Quantity::from_i64(5))
            .external_ref("ERP-7")
            .build();

        assert_eq!(request.lines.len(), 1);
        assert_eq!(request.lines[0].item_id, key.item_id);
        assert_eq!(request.external_ref.as_deref(), Some("ERP-7"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_receipt_builder_defaults_to_staging() {
        let request = ReceiptBuilder::new()
            .line(IdFixtures::widget(), Quantity::from_i64(12))
            .build();

        assert_eq!(request.staging_location_id, IdFixtures::staging_location());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_reservation_builder_uses_the_given_key() {
        let key = KeyFixtures::fresh();
        let request = ReservationBuilder::new().key(&key).quantity(Quantity::from_i64(3)).build();

        assert_eq!(request.location_id, key.location_id);
        assert!(request.demand_ref.starts_with("SO-"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_count_builder_collects_lines() {
        let request = CountBuilder::new()
            .line(&KeyFixtures::fresh(), Quantity::from_i64(4))
            .line(&KeyFixtures::fresh(), Quantity::zero())
            .build();

        assert_eq!(request.lines.len(), 2);
        assert!(request.validate().is_ok());
    }
}
