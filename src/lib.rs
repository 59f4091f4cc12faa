pub mod collaborators;
pub mod commission;
pub mod config;
pub mod contract;
pub mod error;
pub mod history;
pub mod ledger;
pub mod negotiation;
pub mod otc;
pub mod payment;
pub mod service;
pub mod settlement;
pub mod store;
pub mod types;
pub mod utils;

pub use collaborators::{
    InMemoryPublications, Notifier, Publication, PublicationDirectory, TracingNotifier,
};
pub use config::EngineConfig;
pub use contract::{Contract, ContractBid, ContractStatus};
pub use error::{MarketError, MarketResult, PolicyError, ValidationError};
pub use negotiation::ProviderResponse;
pub use service::Marketplace;
pub use settlement::{CashConfirmation, VerificationOutcome};
pub use types::{Money, TimeStamp};
