//! Runs one contract from request to settlement against a throwaway database.
//!
//! `RUST_LOG=contract_settlement=debug cargo run --example walkthrough`
use anyhow::Context;
use contract_settlement::negotiation::ProviderResponse;
use contract_settlement::payment::PaymentStatus;
use contract_settlement::{
    EngineConfig, InMemoryPublications, Marketplace, Money, Publication, TracingNotifier, utils,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let temp_dir = tempfile::tempdir()?;
    let config = EngineConfig {
        db_path: temp_dir.path().join("walkthrough.db"),
        ..EngineConfig::from_env()?
    };

    let provider = utils::new_uuid_to_bech32("user_")?;
    let client = utils::new_uuid_to_bech32("user_")?;
    let publications = Arc::new(InMemoryPublications::new());
    publications.insert(Publication {
        id: "pub_gardening".to_string(),
        owner_id: provider.clone(),
        title: "Weekly garden care".to_string(),
    });

    let market = Marketplace::open(&config, publications, Arc::new(TracingNotifier))?;

    let contract = market.negotiation.create_contract(
        "pub_gardening",
        &client,
        Money::from_major(200),
        "visit",
        Some("Every Saturday morning".to_string()),
    )?;
    market.negotiation.provider_respond(
        &contract.id,
        &provider,
        ProviderResponse::CounterOffer {
            amount: Money::from_major(240),
            message: Some("Includes green waste removal".to_string()),
        },
    )?;

    let bids = market.negotiation.list_bids(&contract.id)?;
    let counter = bids.last().context("counter-offer missing")?;
    let accepted = market.negotiation.accept_bid(&counter.id, &client)?;
    if let Some(breakdown) = accepted.commission {
        println!(
            "accepted at {}: commission {}, provider nets {}",
            accepted.agreed_price(),
            breakdown.commission,
            breakdown.net_to_provider
        );
    }

    market.settlement.record_gateway_payment(
        &contract.id,
        "gw_0001",
        accepted.settlement_amount(),
        PaymentStatus::Paid,
    )?;
    let code = market.settlement.issue_code(&contract.id, &provider)?;
    let outcome = market.settlement.verify_otc(&contract.id, &code, &client)?;
    println!("settled: {:?}, credited: {}", outcome.contract.status, outcome.credited);

    let balance = market.settlement.get_user(&provider)?;
    println!("provider earned {} and owes {}", balance.earned, balance.owed);

    market.flush()?;
    Ok(())
}
