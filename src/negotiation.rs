//! Contract negotiation: creation, bids, provider responses, cancellation and
//! soft deletion.
use crate::collaborators::{Notifier, PublicationDirectory, notify_quietly};
use crate::commission::CommissionRates;
use crate::contract::{BidOrigin, Contract, ContractBid, ContractEvent};
use crate::error::{MarketError, MarketResult, PolicyError, ValidationError};
use crate::payment::PaymentTransaction;
use crate::store::{self, Store, TxResult, check, require_live_contract};
use crate::types::{Money, TimeStamp};
use sled::Transactional;
use sled::transaction::abort;
use std::sync::Arc;

/// A provider's answer to a pending or negotiating contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    Accept,
    Reject { reason: Option<String> },
    CounterOffer { amount: Money, message: Option<String> },
}

pub struct NegotiationService {
    store: Store,
    publications: Arc<dyn PublicationDirectory>,
    notifier: Arc<dyn Notifier>,
    rates: CommissionRates,
}

impl NegotiationService {
    pub fn new(
        store: Store,
        publications: Arc<dyn PublicationDirectory>,
        notifier: Arc<dyn Notifier>,
        rates: CommissionRates,
    ) -> Self {
        Self {
            store,
            publications,
            notifier,
            rates,
        }
    }

    /// Opens a contract on a publication. The provider is always the
    /// publication owner.
    pub fn create_contract(
        &self,
        publication_id: &str,
        client_id: &str,
        initial_price: Money,
        price_unit: &str,
        message: Option<String>,
    ) -> MarketResult<Contract> {
        if !initial_price.is_positive() {
            return Err(ValidationError::NonPositiveAmount.into());
        }

        let publication = self
            .publications
            .get_publication(publication_id)
            .map_err(MarketError::Collaborator)?
            .ok_or_else(|| MarketError::not_found("publication", publication_id))?;

        if publication.owner_id == client_id {
            return Err(PolicyError::SelfDealing {
                publication_id: publication_id.to_string(),
            }
            .into());
        }

        let contract = Contract::new(
            publication.id.clone(),
            client_id.to_string(),
            publication.owner_id.clone(),
            initial_price,
            price_unit.to_string(),
            message,
        );

        self.store
            .contracts
            .transaction(|contracts| store::insert_unique(contracts, &contract.id, &contract))?;

        tracing::info!(
            contract_id = %contract.id,
            client_id,
            provider_id = %contract.provider_id,
            price = %initial_price,
            "contract requested"
        );
        notify_quietly(
            self.notifier.as_ref(),
            &contract.provider_id,
            "New service request",
            &format!(
                "A client requested \"{}\" for {} per {}",
                publication.title, initial_price, contract.price_unit
            ),
        );

        Ok(contract)
    }

    pub fn create_bid(
        &self,
        contract_id: &str,
        bidder_id: &str,
        amount: Money,
        message: Option<String>,
    ) -> MarketResult<ContractBid> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount.into());
        }

        let (contract, bid) = (&self.store.contracts, &self.store.bids).transaction(
            |(contracts, bids)| -> TxResult<_> {
                let mut contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(bidder_id))?;

                let now = TimeStamp::new();
                check(contract.apply(ContractEvent::BidSubmitted, &now))?;

                let bid = ContractBid::new(
                    contract.id.clone(),
                    bidder_id.to_string(),
                    amount,
                    message.clone(),
                    BidOrigin::Party,
                );
                contract.current_price = Some(amount);
                contract.bid_ids.push(bid.id.clone());

                store::insert_unique(bids, &bid.id, &bid)?;
                store::write(contracts, &contract.id, &contract)?;
                Ok((contract, bid))
            },
        )?;

        tracing::info!(contract_id, bid_id = %bid.id, bidder_id, amount = %amount, "bid submitted");
        notify_quietly(
            self.notifier.as_ref(),
            contract.counterparty(bidder_id),
            "New offer on your contract",
            &format!("A new offer of {} was made on contract {}", amount, contract.id),
        );

        Ok(bid)
    }

    /// Accepts a bid, fixing the price and freezing the commission breakdown.
    /// A party cannot accept a bid they proposed; counter-offers count as the
    /// provider's.
    pub fn accept_bid(&self, bid_id: &str, acceptor_id: &str) -> MarketResult<Contract> {
        let contract = (&self.store.contracts, &self.store.bids).transaction(
            |(contracts, bids)| -> TxResult<_> {
                let mut bid: ContractBid = store::require(bids, bid_id, "bid")?;
                let mut contract = require_live_contract(contracts, &bid.contract_id)?;
                check(contract.ensure_party(acceptor_id))?;

                if bid.is_accepted {
                    return abort(
                        PolicyError::BidAlreadyAccepted {
                            bid_id: bid.id.clone(),
                        }
                        .into(),
                    );
                }
                if bid.bidder_id == acceptor_id {
                    return abort(
                        PolicyError::OwnBid {
                            user_id: acceptor_id.to_string(),
                        }
                        .into(),
                    );
                }

                let now = TimeStamp::new();
                check(contract.apply(ContractEvent::BidAccepted, &now))?;
                contract.current_price = Some(bid.amount);
                contract.accepted_bid_id = Some(bid.id.clone());
                check(contract.freeze_commission(&self.rates))?;
                bid.is_accepted = true;

                store::write(bids, &bid.id, &bid)?;
                store::write(contracts, &contract.id, &contract)?;
                Ok(contract)
            },
        )?;

        tracing::info!(
            contract_id = %contract.id,
            bid_id,
            acceptor_id,
            price = %contract.agreed_price(),
            "bid accepted"
        );
        for party in [&contract.client_id, &contract.provider_id] {
            notify_quietly(
                self.notifier.as_ref(),
                party,
                "Contract accepted",
                &format!(
                    "Contract {} was accepted at {}",
                    contract.id,
                    contract.agreed_price()
                ),
            );
        }

        Ok(contract)
    }

    /// Accepting fixes the price at the latest offer, which must have come
    /// from the client.
    pub fn provider_respond(
        &self,
        contract_id: &str,
        provider_id: &str,
        response: ProviderResponse,
    ) -> MarketResult<Contract> {
        if let ProviderResponse::CounterOffer { amount, .. } = &response {
            if !amount.is_positive() {
                return Err(ValidationError::NonPositiveAmount.into());
            }
        }

        let contract = (&self.store.contracts, &self.store.bids).transaction(
            |(contracts, bids)| -> TxResult<_> {
                let mut contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_provider(provider_id))?;
                let now = TimeStamp::new();

                match &response {
                    ProviderResponse::Accept => {
                        let last_bid = match contract.bid_ids.last() {
                            Some(bid_id) => store::read::<ContractBid>(bids, bid_id)?,
                            None => None,
                        };
                        if let Some(mut bid) = last_bid {
                            if bid.bidder_id == provider_id {
                                return abort(
                                    PolicyError::OwnBid {
                                        user_id: provider_id.to_string(),
                                    }
                                    .into(),
                                );
                            }
                            check(contract.apply(ContractEvent::ProviderAccepted, &now))?;
                            contract.current_price = Some(bid.amount);
                            contract.accepted_bid_id = Some(bid.id.clone());
                            bid.is_accepted = true;
                            store::write(bids, &bid.id, &bid)?;
                        } else {
                            check(contract.apply(ContractEvent::ProviderAccepted, &now))?;
                        }
                        check(contract.freeze_commission(&self.rates))?;
                    }
                    ProviderResponse::Reject { reason } => {
                        check(contract.apply(ContractEvent::ProviderRejected, &now))?;
                        contract.provider_message = reason.clone();
                    }
                    ProviderResponse::CounterOffer { amount, message } => {
                        check(contract.apply(ContractEvent::CounterOffered, &now))?;
                        let bid = ContractBid::new(
                            contract.id.clone(),
                            provider_id.to_string(),
                            *amount,
                            message.clone(),
                            BidOrigin::SystemGenerated,
                        );
                        contract.current_price = Some(*amount);
                        contract.bid_ids.push(bid.id.clone());
                        contract.provider_message = message.clone();
                        store::insert_unique(bids, &bid.id, &bid)?;
                    }
                }

                store::write(contracts, &contract.id, &contract)?;
                Ok(contract)
            },
        )?;

        tracing::info!(contract_id, status = ?contract.status, "provider responded");
        notify_quietly(
            self.notifier.as_ref(),
            &contract.client_id,
            "The provider responded to your request",
            &format!(
                "Contract {} is now {:?} at {}",
                contract.id,
                contract.status,
                contract.agreed_price()
            ),
        );

        Ok(contract)
    }

    /// Cancels a non-terminal contract and discards any outstanding one-time code.
    /// A contract with a confirmed payment is past cancelling.
    pub fn cancel(&self, contract_id: &str, actor_id: &str) -> MarketResult<Contract> {
        let trees = (&self.store.contracts, &self.store.codes, &self.store.payments);
        let contract = trees.transaction(
            |(contracts, codes, payments)| -> TxResult<_> {
                let mut contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(actor_id))?;
                check(contract.apply(ContractEvent::Cancelled, &TimeStamp::new()))?;
                let paid: Vec<PaymentTransaction> =
                    store::read(payments, contract_id)?.unwrap_or_default();
                if paid.iter().any(PaymentTransaction::is_confirmed) {
                    return abort(
                        PolicyError::AlreadyPaid {
                            contract_id: contract_id.to_string(),
                        }
                        .into(),
                    );
                }

                codes.remove(contract_id.as_bytes())?;
                store::write(contracts, &contract.id, &contract)?;
                Ok(contract)
            },
        )?;

        tracing::info!(contract_id, actor_id, "contract cancelled");
        notify_quietly(
            self.notifier.as_ref(),
            contract.counterparty(actor_id),
            "Contract cancelled",
            &format!("Contract {} was cancelled", contract.id),
        );

        Ok(contract)
    }

    pub fn soft_delete(&self, contract_id: &str, actor_id: &str) -> MarketResult<Contract> {
        let contract = self.store.contracts.transaction(|contracts| -> TxResult<_> {
            let mut contract = require_live_contract(contracts, contract_id)?;
            check(contract.ensure_party(actor_id))?;

            let now = TimeStamp::new();
            contract.deleted_at = Some(now.clone());
            contract.updated_at = now;
            store::write(contracts, &contract.id, &contract)?;
            Ok(contract)
        })?;

        tracing::info!(contract_id, actor_id, "contract soft-deleted");
        Ok(contract)
    }

    /// Clears the soft-delete marker. Restoring a live contract is a no-op.
    pub fn restore(&self, contract_id: &str, actor_id: &str) -> MarketResult<Contract> {
        let contract = self.store.contracts.transaction(|contracts| -> TxResult<_> {
            let mut contract: Contract = store::require(contracts, contract_id, "contract")?;
            check(contract.ensure_party(actor_id))?;
            if !contract.is_deleted() {
                return Ok(contract);
            }

            contract.deleted_at = None;
            contract.updated_at = TimeStamp::new();
            store::write(contracts, &contract.id, &contract)?;
            Ok(contract)
        })?;

        tracing::info!(contract_id, actor_id, "contract restored");
        Ok(contract)
    }

    pub fn get_contract(&self, contract_id: &str) -> MarketResult<Contract> {
        match Store::get::<Contract>(&self.store.contracts, contract_id)? {
            Some(contract) if !contract.is_deleted() => Ok(contract),
            _ => Err(MarketError::not_found("contract", contract_id)),
        }
    }

    /// Bids of a live contract, oldest first
    pub fn list_bids(&self, contract_id: &str) -> MarketResult<Vec<ContractBid>> {
        let contract = self.get_contract(contract_id)?;
        let mut bids = Vec::with_capacity(contract.bid_ids.len());
        for bid_id in &contract.bid_ids {
            let bid = Store::get::<ContractBid>(&self.store.bids, bid_id)?
                .ok_or_else(|| MarketError::not_found("bid", bid_id.as_str()))?;
            bids.push(bid);
        }
        Ok(bids)
    }

    /// Live contracts where `user_id` is client or provider, oldest first
    pub fn contracts_for_user(&self, user_id: &str) -> MarketResult<Vec<Contract>> {
        let mut contracts: Vec<Contract> = Store::scan::<Contract>(&self.store.contracts)?
            .into_iter()
            .filter(|c| !c.is_deleted() && c.is_party(user_id))
            .collect();
        contracts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(contracts)
    }
}
