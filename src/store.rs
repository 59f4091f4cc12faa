//! Durable storage: one sled tree per record kind, CBOR-encoded values.
//!
//! Every mutating operation runs as a single multi-tree sled transaction. sled
//! may re-run a transaction closure on conflict, so closures must derive all
//! state from reads made through the `TransactionalTree`s they are handed.
use crate::contract::Contract;
use crate::error::{MarketError, MarketResult};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree, abort,
};
use sled::{IVec, Tree};
use std::sync::Arc;

/// Result of a transaction closure in this crate
pub(crate) type TxResult<T> = ConflictableTransactionResult<T, MarketError>;

pub const TREE_CONTRACTS: &str = "contracts";
pub const TREE_BIDS: &str = "bids";
pub const TREE_CODES: &str = "one_time_codes";
pub const TREE_PAYMENTS: &str = "payments";
pub const TREE_LEDGER: &str = "ledger_entries";
pub const TREE_BALANCES: &str = "balances";
pub const TREE_FEES: &str = "platform_fees";

#[derive(Debug, Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
    pub(crate) contracts: Tree,
    pub(crate) bids: Tree,
    pub(crate) codes: Tree,
    pub(crate) payments: Tree, // contract id -> Vec<PaymentTransaction>
    pub(crate) ledger: Tree,   // (contract, user, type) -> LedgerEntry
    pub(crate) balances: Tree,
    pub(crate) fees: Tree, // (provider, contract) -> PlatformFeeLedger
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> MarketResult<Self> {
        Ok(Self {
            contracts: instance.open_tree(TREE_CONTRACTS)?,
            bids: instance.open_tree(TREE_BIDS)?,
            codes: instance.open_tree(TREE_CODES)?,
            payments: instance.open_tree(TREE_PAYMENTS)?,
            ledger: instance.open_tree(TREE_LEDGER)?,
            balances: instance.open_tree(TREE_BALANCES)?,
            fees: instance.open_tree(TREE_FEES)?,
            instance,
        })
    }

    pub fn flush(&self) -> MarketResult<()> {
        self.instance.flush()?;
        Ok(())
    }

    /// Point read outside of a transaction
    pub(crate) fn get<T>(tree: &Tree, key: &str) -> MarketResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes every value in `tree`
    pub(crate) fn scan<T>(tree: &Tree) -> MarketResult<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut out = vec![];
        for item in tree.iter() {
            let (key, value) = item?;
            out.push(decode(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(out)
    }
}

fn decode<T>(key: &str, bytes: &[u8]) -> MarketResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| MarketError::codec(key, e))
}

pub(crate) fn read<T>(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, MarketError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => match decode(key, &bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => abort(err),
        },
        None => Ok(None),
    }
}

/// Like [`read`] but aborts with not-found when the key is absent
pub(crate) fn require<T>(
    tree: &TransactionalTree,
    key: &str,
    entity: &'static str,
) -> ConflictableTransactionResult<T, MarketError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match read(tree, key)? {
        Some(value) => Ok(value),
        None => abort(MarketError::not_found(entity, key)),
    }
}

pub(crate) fn write<T>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<Option<IVec>, MarketError>
where
    T: minicbor::Encode<()>,
{
    let bytes = match minicbor::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => return abort(MarketError::codec(key, err)),
    };
    Ok(tree.insert(key.as_bytes(), bytes)?)
}

/// Aborts the transaction when a guard outside the store fails
pub(crate) fn check<T, E>(result: Result<T, E>) -> ConflictableTransactionResult<T, MarketError>
where
    E: Into<MarketError>,
{
    result.map_err(|err| ConflictableTransactionError::Abort(err.into()))
}

/// Loads a contract that has not been soft-deleted
pub(crate) fn require_live_contract(
    contracts: &TransactionalTree,
    contract_id: &str,
) -> ConflictableTransactionResult<Contract, MarketError> {
    let contract: Contract = require(contracts, contract_id, "contract")?;
    if contract.is_deleted() {
        return abort(MarketError::not_found("contract", contract_id));
    }
    Ok(contract)
}

/// Insert that refuses to replace an existing value: the store-level
/// uniqueness constraint for keyed records.
pub(crate) fn insert_unique<T>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), MarketError>
where
    T: minicbor::Encode<()>,
{
    if write(tree, key, value)?.is_some() {
        return abort(MarketError::constraint(format!("duplicate key {key}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;
    use sled::Transactional;

    #[test]
    fn aborted_transaction_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("store.db")).unwrap());
        let store = Store::open(db).unwrap();

        let trees = (&store.ledger, &store.balances);
        let result: Result<(), _> = trees.transaction(|(ledger, balances)| {
            write(ledger, "k", &Money::from_minor(1))?;
            write(balances, "k", &Money::from_minor(2))?;
            abort(MarketError::constraint("boom"))
        });

        assert!(result.is_err());
        assert!(Store::get::<Money>(&store.ledger, "k").unwrap().is_none());
        assert!(Store::get::<Money>(&store.balances, "k").unwrap().is_none());
    }

    #[test]
    fn insert_unique_rejects_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("store.db")).unwrap());
        let store = Store::open(db).unwrap();

        let first: Result<(), sled::transaction::TransactionError<MarketError>> = store
            .ledger
            .transaction(|t| insert_unique(t, "k", &Money::from_minor(1)));
        let second: Result<(), sled::transaction::TransactionError<MarketError>> = store
            .ledger
            .transaction(|t| insert_unique(t, "k", &Money::from_minor(2)));

        assert!(first.is_ok());
        assert!(second.is_err());
        assert_eq!(
            Store::get::<Money>(&store.ledger, "k").unwrap(),
            Some(Money::from_minor(1))
        );
    }
}
