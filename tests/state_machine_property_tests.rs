//! Property-based tests for the commission calculator and the contract
//! lifecycle transition table.

use contract_settlement::commission::CommissionRates;
use contract_settlement::contract::ContractEvent;
use contract_settlement::{Contract, ContractStatus, Money, TimeStamp};
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

/// Prices from one cent up to ten million currency units
fn price_strategy() -> impl Strategy<Value = Money> {
    (1i64..=1_000_000_000).prop_map(Money::from_minor)
}

fn status_strategy() -> impl Strategy<Value = ContractStatus> {
    prop::sample::select(ContractStatus::ALL.to_vec())
}

fn event_strategy() -> impl Strategy<Value = ContractEvent> {
    prop::sample::select(ContractEvent::ALL.to_vec())
}

fn contract_in(status: ContractStatus) -> Contract {
    let mut contract = Contract::new(
        "pub_1".to_string(),
        "client".to_string(),
        "provider".to_string(),
        Money::from_major(100),
        "job".to_string(),
        None,
    );
    contract.status = status;
    contract
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Commission and net always add back up to the price
    #[test]
    fn prop_commission_plus_net_is_price(price in price_strategy()) {
        let breakdown = CommissionRates::default().breakdown(price).unwrap();
        prop_assert_eq!(
            breakdown.commission.checked_add(breakdown.net_to_provider),
            Some(price)
        );
    }

    #[test]
    fn prop_components_within_bounds(price in price_strategy()) {
        let breakdown = CommissionRates::default().breakdown(price).unwrap();
        prop_assert!(!breakdown.commission.is_negative());
        prop_assert!(breakdown.commission <= price);
        prop_assert!(breakdown.commission_with_tax >= breakdown.commission);
    }

    /// Each component is within half a cent of the exact value
    #[test]
    fn prop_commission_rounds_to_nearest_cent(price in price_strategy()) {
        let breakdown = CommissionRates::default().breakdown(price).unwrap();
        let exact = i128::from(price.minor()) * 800;
        let rounded = i128::from(breakdown.commission.minor()) * 10_000;
        prop_assert!((exact - rounded).abs() <= 5_000);
    }

    #[test]
    fn prop_breakdown_is_deterministic(
        price in price_strategy(),
        commission_bps in 0u32..=10_000,
        tax_bps in 0u32..=10_000,
    ) {
        let rates = CommissionRates { commission_bps, tax_bps };
        prop_assert_eq!(rates.breakdown(price), rates.breakdown(price));
    }

    /// Terminal states accept no event
    #[test]
    fn prop_terminal_states_are_stable(status in status_strategy(), event in event_strategy()) {
        if status.is_terminal() {
            prop_assert_eq!(status.next(event), None);
        }
    }

    /// Completed is reachable only from Accepted, and only by settling
    #[test]
    fn prop_only_settlement_completes(status in status_strategy(), event in event_strategy()) {
        if status.next(event) == Some(ContractStatus::Completed) {
            prop_assert_eq!(status, ContractStatus::Accepted);
            prop_assert_eq!(event, ContractEvent::Settled);
        }
    }

    /// `apply` follows the table and leaves a refused contract untouched
    #[test]
    fn prop_apply_matches_table(status in status_strategy(), event in event_strategy()) {
        let mut contract = contract_in(status);
        let before = contract.clone();
        let result = contract.apply(event, &TimeStamp::new());

        match status.next(event) {
            Some(next) => {
                prop_assert!(result.is_ok());
                prop_assert_eq!(contract.status, next);
                prop_assert_eq!(contract.completed_at.is_some(), next == ContractStatus::Completed);
                prop_assert_eq!(contract.cancelled_at.is_some(), next == ContractStatus::Cancelled);
            }
            None => {
                prop_assert!(result.is_err());
                prop_assert_eq!(contract, before);
            }
        }
    }

    /// Random walks never leave a terminal state once they reach one
    #[test]
    fn prop_walks_end_in_terminal_state(events in prop::collection::vec(event_strategy(), 1..20)) {
        let mut contract = contract_in(ContractStatus::Pending);
        let mut terminal_at = None;
        for (step, event) in events.iter().enumerate() {
            let _ = contract.apply(*event, &TimeStamp::new());
            if terminal_at.is_none() && contract.status.is_terminal() {
                terminal_at = Some((step, contract.status));
            }
        }
        if let Some((_, reached)) = terminal_at {
            prop_assert_eq!(contract.status, reached);
        }
    }
}
