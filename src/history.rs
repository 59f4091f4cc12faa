//! Read models over settled and cancelled contracts, consumed by provider
//! level scoring.
use crate::contract::{Contract, ContractStatus};
use crate::error::MarketResult;
use crate::payment::PaymentTransaction;
use crate::store::Store;
use crate::types::TimeStamp;
use chrono::{Duration, Utc};

pub struct SettlementHistory {
    store: Store,
}

impl SettlementHistory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Completed contracts of `provider_id` backed by at least one confirmed
    /// payment. With a `window`, only completions inside the last `window`
    /// count.
    pub fn completed_with_payment_count(
        &self,
        provider_id: &str,
        window: Option<Duration>,
    ) -> MarketResult<usize> {
        let since = window_start(window);
        let mut count = 0;
        for contract in self.provider_contracts(provider_id, ContractStatus::Completed)? {
            if !within(contract.completed_at.as_ref(), since.as_ref()) {
                continue;
            }
            let payments: Vec<PaymentTransaction> =
                Store::get(&self.store.payments, &contract.id)?.unwrap_or_default();
            if payments.iter().any(PaymentTransaction::is_confirmed) {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn cancelled_count(
        &self,
        provider_id: &str,
        window: Option<Duration>,
    ) -> MarketResult<usize> {
        let since = window_start(window);
        Ok(self
            .provider_contracts(provider_id, ContractStatus::Cancelled)?
            .iter()
            .filter(|c| within(c.cancelled_at.as_ref(), since.as_ref()))
            .count())
    }

    fn provider_contracts(
        &self,
        provider_id: &str,
        status: ContractStatus,
    ) -> MarketResult<Vec<Contract>> {
        Ok(Store::scan::<Contract>(&self.store.contracts)?
            .into_iter()
            .filter(|c| !c.is_deleted() && c.provider_id == provider_id && c.status == status)
            .collect())
    }
}

// a window reaching past the earliest storable instant has no lower bound
fn window_start(window: Option<Duration>) -> Option<TimeStamp<Utc>> {
    window.and_then(|w| TimeStamp::new().minus(w))
}

fn within(at: Option<&TimeStamp<Utc>>, since: Option<&TimeStamp<Utc>>) -> bool {
    match (at, since) {
        (_, None) => true,
        (Some(at), Some(since)) => at >= since,
        (None, Some(_)) => false,
    }
}
