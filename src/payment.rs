//! Payment transactions and the platform fee debt left by cash settlements
use crate::types::{Money, TimeStamp};
use crate::utils::{self, FEE_HRP, PAYMENT_HRP};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    #[n(0)]
    Cash,
    #[n(1)]
    Gateway,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Completed,
    #[n(2)]
    Paid,
    #[n(3)]
    Failed,
    #[n(4)]
    Refunded,
}

/// Statuses meaning the funds were received.
// TODO: consolidate `Completed` and `Paid` once gateway callbacks stop emitting `Paid`.
pub const CONFIRMED_PAYMENT_STATUSES: [PaymentStatus; 2] =
    [PaymentStatus::Completed, PaymentStatus::Paid];

impl PaymentStatus {
    pub fn is_confirmed(self) -> bool {
        CONFIRMED_PAYMENT_STATUSES.contains(&self)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransaction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub contract_id: String,
    #[n(2)]
    pub method: PaymentMethod,
    #[n(3)]
    pub status: PaymentStatus,
    #[n(4)]
    pub amount: Money,
    #[n(5)]
    pub reference: Option<String>, // gateway reference, none for cash
    #[n(6)]
    pub paid_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl PaymentTransaction {
    pub fn new(
        contract_id: String,
        method: PaymentMethod,
        status: PaymentStatus,
        amount: Money,
        reference: Option<String>,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id: utils::new_id(PAYMENT_HRP),
            contract_id,
            method,
            status,
            amount,
            reference,
            paid_at: status.is_confirmed().then(|| now.clone()),
            created_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.is_confirmed()
    }

    /// Moves to `status`. `paid_at` is set the first time the payment is confirmed
    /// and never overwritten afterwards.
    pub fn update_status(&mut self, status: PaymentStatus, now: &TimeStamp<Utc>) {
        self.status = status;
        if status.is_confirmed() && self.paid_at.is_none() {
            self.paid_at = Some(now.clone());
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Paid,
    #[n(2)]
    Overdue,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PlatformFeeLedger {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub provider_id: String,
    #[n(2)]
    pub contract_id: String,
    #[n(3)]
    pub amount: Money,
    #[n(4)]
    pub status: FeeStatus,
    #[n(5)]
    pub due_at: TimeStamp<Utc>,
    #[n(6)]
    pub paid_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl PlatformFeeLedger {
    pub fn new(
        provider_id: String,
        contract_id: String,
        amount: Money,
        due_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id: utils::new_id(FEE_HRP),
            provider_id,
            contract_id,
            amount,
            status: FeeStatus::Pending,
            due_at,
            paid_at: None,
            created_at: TimeStamp::new(),
        }
    }

    /// One row per (provider, contract)
    pub fn key(provider_id: &str, contract_id: &str) -> String {
        format!("{provider_id}/{contract_id}")
    }

    pub fn is_overdue(&self, now: &TimeStamp<Utc>) -> bool {
        self.status == FeeStatus::Pending && *now > self.due_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_aliases_count_as_confirmed() {
        assert!(PaymentStatus::Completed.is_confirmed());
        assert!(PaymentStatus::Paid.is_confirmed());
        assert!(!PaymentStatus::Pending.is_confirmed());
        assert!(!PaymentStatus::Refunded.is_confirmed());
    }

    #[test]
    fn paid_at_is_kept_on_reconfirmation() {
        let mut payment = PaymentTransaction::new(
            "contract_a".into(),
            PaymentMethod::Gateway,
            PaymentStatus::Completed,
            Money::from_major(10),
            Some("ref-1".into()),
        );
        let first = payment.paid_at.clone();

        payment.update_status(PaymentStatus::Paid, &TimeStamp::new_with(2030, 1, 1, 0, 0, 0));

        assert_eq!(payment.paid_at, first);
    }
}
