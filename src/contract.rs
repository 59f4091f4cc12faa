//! Contract and bid records, and the negotiation state machine
use crate::commission::{CommissionBreakdown, CommissionRates};
use crate::error::{MarketError, PolicyError};
use crate::types::{Money, TimeStamp};
use crate::utils::{self, BID_HRP, CONTRACT_HRP};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Negotiating,
    #[n(2)]
    Accepted,
    #[n(3)]
    Rejected,
    #[n(4)]
    Cancelled,
    #[n(5)]
    Completed,
}

/// Everything that can move a contract between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractEvent {
    BidSubmitted,
    BidAccepted,
    ProviderAccepted,
    ProviderRejected,
    CounterOffered,
    Cancelled,
    Settled,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 6] = [
        ContractStatus::Pending,
        ContractStatus::Negotiating,
        ContractStatus::Accepted,
        ContractStatus::Rejected,
        ContractStatus::Cancelled,
        ContractStatus::Completed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContractStatus::Rejected | ContractStatus::Cancelled | ContractStatus::Completed
        )
    }

    /// The transition table. `None` means the event is not allowed from `self`.
    pub fn next(self, event: ContractEvent) -> Option<ContractStatus> {
        use ContractEvent as E;
        use ContractStatus as S;

        match (self, event) {
            (S::Pending | S::Negotiating, E::BidSubmitted | E::CounterOffered) => {
                Some(S::Negotiating)
            }
            (S::Pending | S::Negotiating, E::BidAccepted | E::ProviderAccepted) => {
                Some(S::Accepted)
            }
            (S::Pending | S::Negotiating, E::ProviderRejected) => Some(S::Rejected),
            (S::Pending | S::Negotiating | S::Accepted, E::Cancelled) => Some(S::Cancelled),
            (S::Accepted, E::Settled) => Some(S::Completed),
            _ => None,
        }
    }
}

impl ContractEvent {
    pub const ALL: [ContractEvent; 7] = [
        ContractEvent::BidSubmitted,
        ContractEvent::BidAccepted,
        ContractEvent::ProviderAccepted,
        ContractEvent::ProviderRejected,
        ContractEvent::CounterOffered,
        ContractEvent::Cancelled,
        ContractEvent::Settled,
    ];

    pub fn action(self) -> &'static str {
        match self {
            ContractEvent::BidSubmitted => "bid on",
            ContractEvent::BidAccepted => "accept a bid on",
            ContractEvent::ProviderAccepted => "accept",
            ContractEvent::ProviderRejected => "reject",
            ContractEvent::CounterOffered => "counter-offer on",
            ContractEvent::Cancelled => "cancel",
            ContractEvent::Settled => "settle",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub publication_id: String,
    #[n(2)]
    pub client_id: String,
    #[n(3)]
    pub provider_id: String,
    #[n(4)]
    pub status: ContractStatus,
    #[n(5)]
    pub initial_price: Money,
    #[n(6)]
    pub current_price: Option<Money>,
    #[n(7)]
    pub total_price: Option<Money>, // price including tax, set on acceptance
    #[n(8)]
    pub price_unit: String,
    #[n(9)]
    pub commission: Option<CommissionBreakdown>,
    #[n(10)]
    pub otp_verified: bool,
    #[n(11)]
    pub bid_ids: Vec<String>,
    #[n(12)]
    pub accepted_bid_id: Option<String>,
    #[n(13)]
    pub client_message: Option<String>,
    #[n(14)]
    pub provider_message: Option<String>,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub updated_at: TimeStamp<Utc>,
    #[n(17)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub deleted_at: Option<TimeStamp<Utc>>,
}

impl Contract {
    pub fn new(
        publication_id: String,
        client_id: String,
        provider_id: String,
        initial_price: Money,
        price_unit: String,
        client_message: Option<String>,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id: utils::new_id(CONTRACT_HRP),
            publication_id,
            client_id,
            provider_id,
            status: ContractStatus::Pending,
            initial_price,
            current_price: None,
            total_price: None,
            price_unit,
            commission: None,
            otp_verified: false,
            bid_ids: vec![],
            accepted_bid_id: None,
            client_message,
            provider_message: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }

    pub fn ensure_party(&self, user_id: &str) -> Result<(), PolicyError> {
        if self.is_party(user_id) {
            return Ok(());
        }
        Err(PolicyError::NotAParty {
            user_id: user_id.to_string(),
            contract_id: self.id.clone(),
        })
    }

    pub fn ensure_provider(&self, user_id: &str) -> Result<(), PolicyError> {
        if self.provider_id == user_id {
            return Ok(());
        }
        Err(PolicyError::NotProvider {
            contract_id: self.id.clone(),
        })
    }

    /// The other side of the contract from `user_id`.
    pub fn counterparty(&self, user_id: &str) -> &str {
        if self.client_id == user_id {
            &self.provider_id
        } else {
            &self.client_id
        }
    }

    /// The price both parties are currently negotiating around.
    pub fn agreed_price(&self) -> Money {
        self.current_price.unwrap_or(self.initial_price)
    }

    /// What the provider is credited on completion: current, then total, then initial price.
    pub fn settlement_amount(&self) -> Money {
        self.current_price
            .or(self.total_price)
            .unwrap_or(self.initial_price)
    }

    /// Moves the contract along the transition table, stamping the matching timestamp.
    pub fn apply(&mut self, event: ContractEvent, now: &TimeStamp<Utc>) -> Result<(), PolicyError> {
        let next = self
            .status
            .next(event)
            .ok_or(PolicyError::InvalidTransition {
                from: self.status,
                action: event.action(),
            })?;

        match next {
            ContractStatus::Cancelled => self.cancelled_at = Some(now.clone()),
            ContractStatus::Completed => self.completed_at = Some(now.clone()),
            _ => {}
        }
        self.status = next;
        self.updated_at = now.clone();
        Ok(())
    }

    /// Snapshots the agreed price and fixes the commission breakdown. A breakdown
    /// that is already frozen is left untouched.
    pub fn freeze_commission(&mut self, rates: &CommissionRates) -> Result<(), MarketError> {
        if self.commission.is_some() {
            return Ok(());
        }
        let price = self.agreed_price();
        let breakdown = rates
            .breakdown(price)
            .ok_or_else(|| MarketError::constraint(format!("commission overflow on {price}")))?;
        let total = rates
            .total_with_tax(price)
            .ok_or_else(|| MarketError::constraint(format!("total price overflow on {price}")))?;

        self.current_price = Some(price);
        self.total_price = Some(total);
        self.commission = Some(breakdown);
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidOrigin {
    /// Proposed directly by the bidder
    #[n(0)]
    Party,
    /// Created on the provider's behalf by a counter-offer response
    #[n(1)]
    SystemGenerated,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ContractBid {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub contract_id: String,
    #[n(2)]
    pub bidder_id: String,
    #[n(3)]
    pub amount: Money,
    #[n(4)]
    pub message: Option<String>,
    #[n(5)]
    pub is_accepted: bool,
    #[n(6)]
    pub origin: BidOrigin,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl ContractBid {
    pub fn new(
        contract_id: String,
        bidder_id: String,
        amount: Money,
        message: Option<String>,
        origin: BidOrigin,
    ) -> Self {
        Self {
            id: utils::new_id(BID_HRP),
            contract_id,
            bidder_id,
            amount,
            message,
            is_accepted: false,
            origin,
            created_at: TimeStamp::new(),
        }
    }

    pub fn is_system_generated(&self) -> bool {
        self.origin == BidOrigin::SystemGenerated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Contract {
        Contract::new(
            "pub_1".into(),
            "client".into(),
            "provider".into(),
            Money::from_major(100),
            "hour".into(),
            None,
        )
    }

    #[test]
    fn terminal_statuses_have_no_way_out() {
        for status in ContractStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for event in ContractEvent::ALL {
                assert_eq!(status.next(event), None, "{status:?} accepted {event:?}");
            }
        }
    }

    #[test]
    fn apply_stamps_cancelled_at() {
        let mut c = contract();
        let now = TimeStamp::new();
        c.apply(ContractEvent::Cancelled, &now).unwrap();

        assert_eq!(c.status, ContractStatus::Cancelled);
        assert_eq!(c.cancelled_at, Some(now));
    }

    #[test]
    fn settle_requires_acceptance() {
        let mut c = contract();
        let err = c.apply(ContractEvent::Settled, &TimeStamp::new()).unwrap_err();

        assert_eq!(
            err,
            PolicyError::InvalidTransition {
                from: ContractStatus::Pending,
                action: "settle"
            }
        );
    }

    #[test]
    fn frozen_commission_survives_price_change() {
        let mut c = contract();
        c.current_price = Some(Money::from_major(20_000));
        c.freeze_commission(&CommissionRates::default()).unwrap();
        let frozen = c.commission;

        c.current_price = Some(Money::from_major(1));
        c.freeze_commission(&CommissionRates::default()).unwrap();

        assert_eq!(c.commission, frozen);
    }
}
