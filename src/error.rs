//! Error taxonomy for negotiation and settlement operations
use crate::contract::ContractStatus;
use sled::transaction::TransactionError;

pub type MarketResult<T> = Result<T, MarketError>;

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("{entity} {id} was not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("collaborator unavailable")]
    Collaborator(#[source] anyhow::Error),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("user {user_id} is not a party to contract {contract_id}")]
    NotAParty { user_id: String, contract_id: String },
    #[error("only the provider of contract {contract_id} may respond")]
    NotProvider { contract_id: String },
    #[error("a client cannot contract their own publication {publication_id}")]
    SelfDealing { publication_id: String },
    #[error("user {user_id} cannot accept a bid they proposed")]
    OwnBid { user_id: String },
    #[error("bid {bid_id} has already been accepted")]
    BidAlreadyAccepted { bid_id: String },
    #[error("contract {contract_id} has a confirmed payment and cannot be cancelled")]
    AlreadyPaid { contract_id: String },
    #[error("cannot {action} a contract in status {from:?}")]
    InvalidTransition {
        from: ContractStatus,
        action: &'static str,
    },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("no one-time code has been issued for this contract")]
    NoActiveCode,
    #[error("one-time code does not match, {remaining} attempts remaining")]
    CodeMismatch { remaining: u32 },
    #[error("one-time code has expired")]
    CodeExpired,
    #[error("one-time code has already been used")]
    CodeUsed,
    #[error("one-time code attempts exhausted")]
    AttemptsExhausted,
    #[error("no confirmed payment exists for this contract")]
    NoConfirmedPayment,
}

#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode {key}: {reason}")]
    Codec { key: String, reason: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl MarketError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MarketError::NotFound {
            entity,
            id: id.into(),
        }
    }
    pub fn constraint(msg: impl Into<String>) -> Self {
        PersistenceError::Constraint(msg.into()).into()
    }
    pub fn codec(key: &str, reason: impl ToString) -> Self {
        PersistenceError::Codec {
            key: key.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }
    pub fn is_not_found(&self) -> bool {
        matches!(self, MarketError::NotFound { .. })
    }
    pub fn policy(&self) -> Option<&PolicyError> {
        match self {
            MarketError::Policy(err) => Some(err),
            _ => None,
        }
    }
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            MarketError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sled::Error> for MarketError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Storage(err).into()
    }
}

impl From<TransactionError<MarketError>> for MarketError {
    fn from(err: TransactionError<MarketError>) -> Self {
        match err {
            TransactionError::Abort(err) => {
                if let MarketError::Persistence(inner) = &err {
                    tracing::error!(error = %inner, "unit of work rolled back");
                }
                err
            }
            TransactionError::Storage(err) => {
                tracing::error!(error = %err, "storage failure, unit of work rolled back");
                PersistenceError::Storage(err).into()
            }
        }
    }
}
