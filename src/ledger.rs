//! Append-only balance ledger.
//!
//! Each entry is stored under its `(contract, user, type)` key, so at most one
//! entry of a given type can ever exist for a user on a contract. Balances are
//! only written here, inside the caller's transaction, from a freshly read
//! value plus a signed delta.
use crate::error::{MarketError, MarketResult};
use crate::store::{self, Store};
use crate::types::{Money, TimeStamp};
use crate::utils::{self, LEDGER_HRP};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerEntryType {
    /// Provider owes the platform commission after a cash settlement
    #[n(0)]
    DebitOnCompletion,
    /// Provider earns the contract amount on settlement
    #[n(1)]
    CreditOnCompletion,
    /// Provider paid off a platform fee debt
    #[n(2)]
    CreditOnPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Account {
    Owed,
    Earned,
}

impl LedgerEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerEntryType::DebitOnCompletion => "debit-on-completion",
            LedgerEntryType::CreditOnCompletion => "credit-on-completion",
            LedgerEntryType::CreditOnPayment => "credit-on-payment",
        }
    }

    pub fn account(self) -> Account {
        match self {
            LedgerEntryType::CreditOnCompletion => Account::Earned,
            LedgerEntryType::DebitOnCompletion | LedgerEntryType::CreditOnPayment => Account::Owed,
        }
    }

    /// Signed delta applied to the account for a posting of `magnitude`
    fn delta(self, magnitude: Money) -> Option<Money> {
        match self {
            LedgerEntryType::CreditOnPayment => magnitude.checked_neg(),
            _ => Some(magnitude),
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    #[n(0)]
    Posted,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub contract_id: String,
    #[n(3)]
    pub payment_id: Option<String>,
    #[n(4)]
    pub amount: Money, // signed
    #[n(5)]
    pub balance_before: Money,
    #[n(6)]
    pub balance_after: Money,
    #[n(7)]
    pub entry_type: LedgerEntryType,
    #[n(8)]
    pub status: EntryStatus,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UserBalance {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub owed: Money,
    #[n(2)]
    pub earned: Money,
    #[n(3)]
    pub updated_at: Option<TimeStamp<Utc>>,
}

impl UserBalance {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            owed: Money::ZERO,
            earned: Money::ZERO,
            updated_at: None,
        }
    }

    pub fn get(&self, account: Account) -> Money {
        match account {
            Account::Owed => self.owed,
            Account::Earned => self.earned,
        }
    }

    fn set(&mut self, account: Account, value: Money) {
        match account {
            Account::Owed => self.owed = value,
            Account::Earned => self.earned = value,
        }
    }
}

/// A balance mutation requested by a settlement operation
#[derive(Debug, Clone)]
pub struct Posting<'a> {
    pub user_id: &'a str,
    pub contract_id: &'a str,
    pub payment_id: Option<&'a str>,
    pub entry_type: LedgerEntryType,
    pub magnitude: Money,
}

pub fn entry_key(contract_id: &str, user_id: &str, entry_type: LedgerEntryType) -> String {
    format!("{contract_id}/{user_id}/{entry_type}")
}

/// Writes the entry and the balance it affects. Returns `None` without writing
/// when an entry with the same `(contract, user, type)` already exists.
pub(crate) fn post(
    ledger: &TransactionalTree,
    balances: &TransactionalTree,
    posting: &Posting<'_>,
    now: &TimeStamp<Utc>,
) -> ConflictableTransactionResult<Option<LedgerEntry>, MarketError> {
    let key = entry_key(posting.contract_id, posting.user_id, posting.entry_type);
    if store::read::<LedgerEntry>(ledger, &key)?.is_some() {
        return Ok(None);
    }

    let account = posting.entry_type.account();
    let mut balance = store::read::<UserBalance>(balances, posting.user_id)?
        .unwrap_or_else(|| UserBalance::empty(posting.user_id));
    let before = balance.get(account);

    let Some(amount) = posting.entry_type.delta(posting.magnitude) else {
        return abort(MarketError::constraint("ledger amount out of range"));
    };
    let after = match before.checked_add(amount) {
        Some(after) if !after.is_negative() => after,
        Some(_) => {
            return abort(MarketError::constraint(format!(
                "{:?} balance of {} would go negative",
                account, posting.user_id
            )));
        }
        None => {
            return abort(MarketError::constraint(format!(
                "{:?} balance of {} overflows",
                account, posting.user_id
            )));
        }
    };

    let entry = LedgerEntry {
        id: utils::new_id(LEDGER_HRP),
        user_id: posting.user_id.to_string(),
        contract_id: posting.contract_id.to_string(),
        payment_id: posting.payment_id.map(str::to_string),
        amount,
        balance_before: before,
        balance_after: after,
        entry_type: posting.entry_type,
        status: EntryStatus::Posted,
        created_at: now.clone(),
    };
    store::insert_unique(ledger, &key, &entry)?;

    balance.set(account, after);
    balance.updated_at = Some(now.clone());
    store::write(balances, posting.user_id, &balance)?;

    Ok(Some(entry))
}

pub fn balance_of(store: &Store, user_id: &str) -> MarketResult<UserBalance> {
    Ok(Store::get::<UserBalance>(&store.balances, user_id)?
        .unwrap_or_else(|| UserBalance::empty(user_id)))
}

pub fn entries_for_user(store: &Store, user_id: &str) -> MarketResult<Vec<LedgerEntry>> {
    let mut entries: Vec<LedgerEntry> = Store::scan::<LedgerEntry>(&store.ledger)?
        .into_iter()
        .filter(|e| e.user_id == user_id)
        .collect();
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sled::Transactional;
    use sled::transaction::TransactionError;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("ledger.db")).unwrap());
        (dir, Store::open(db).unwrap())
    }

    fn run(
        store: &Store,
        posting: &Posting<'_>,
    ) -> Result<Option<LedgerEntry>, TransactionError<MarketError>> {
        let now = TimeStamp::new();
        (&store.ledger, &store.balances)
            .transaction(|(ledger, balances)| post(ledger, balances, posting, &now))
    }

    #[test]
    fn second_posting_with_same_key_is_skipped() {
        let (_dir, store) = store();
        let posting = Posting {
            user_id: "provider",
            contract_id: "contract_a",
            payment_id: None,
            entry_type: LedgerEntryType::CreditOnCompletion,
            magnitude: Money::from_major(50),
        };

        let first = run(&store, &posting).unwrap().unwrap();
        assert_eq!(first.balance_before, Money::ZERO);
        assert_eq!(first.balance_after, Money::from_major(50));
        assert!(run(&store, &posting).unwrap().is_none());

        assert_eq!(balance_of(&store, "provider").unwrap().earned, Money::from_major(50));
    }

    #[test]
    fn owed_cannot_go_negative() {
        let (_dir, store) = store();
        let posting = Posting {
            user_id: "provider",
            contract_id: "contract_a",
            payment_id: None,
            entry_type: LedgerEntryType::CreditOnPayment,
            magnitude: Money::from_major(5),
        };

        assert!(run(&store, &posting).is_err());
        assert!(entries_for_user(&store, "provider").unwrap().is_empty());
    }
}
