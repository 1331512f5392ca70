use super::{status_guard, Model, ModelFields, Transition};
use crate::{error::Result, EntityKind, FieldGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentLineItemStatus {
    NotPaid,
    Processing,
    Paid,
}

impl fmt::Display for PaymentLineItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentLineItemStatus::NotPaid => f.write_str("not-paid"),
            PaymentLineItemStatus::Processing => f.write_str("processing"),
            PaymentLineItemStatus::Paid => f.write_str("paid"),
        }
    }
}

impl Transition for PaymentLineItemStatus {
    const ALL: &'static [Self] = &[
        PaymentLineItemStatus::NotPaid,
        PaymentLineItemStatus::Processing,
        PaymentLineItemStatus::Paid,
    ];

    fn allowed(&self) -> &'static [Self] {
        match self {
            PaymentLineItemStatus::NotPaid => &[PaymentLineItemStatus::Processing],
            PaymentLineItemStatus::Processing => {
                &[PaymentLineItemStatus::NotPaid, PaymentLineItemStatus::Paid]
            }
            PaymentLineItemStatus::Paid => &[],
        }
    }
}

/// A payable amount for one timelog version of one job version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLineItemFields {
    pub job_uid: String,
    pub timelog_uid: String,
    pub amount: f64,
    pub status: PaymentLineItemStatus,
}

impl ModelFields for PaymentLineItemFields {
    const KIND: EntityKind = EntityKind::PaymentLineItem;

    fn guard(&self) -> Result<Option<FieldGuard>> {
        status_guard("status", self.status).map(Some)
    }
}

pub type PaymentLineItem = Model<PaymentLineItemFields>;

impl Model<PaymentLineItemFields> {
    pub fn is_paid(&self) -> bool {
        self.fields.status == PaymentLineItemStatus::Paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&PaymentLineItemStatus::NotPaid).unwrap();
        assert_eq!(json, "\"not-paid\"");
        assert_eq!(PaymentLineItemStatus::NotPaid.to_string(), "not-paid");
    }

    #[test]
    fn transitions() {
        use PaymentLineItemStatus::*;
        assert!(NotPaid.can_transition_to(Processing));
        assert!(!NotPaid.can_transition_to(Paid));
        assert!(Processing.can_transition_to(NotPaid));
        assert!(Processing.can_transition_to(Paid));
        assert!(Paid.is_terminal());
    }
}
