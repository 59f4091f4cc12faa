//! Settlement: one-time-code gated completion, direct completion, cash
//! confirmation and the platform fee debt it leaves behind.
//!
//! Every operation is a single sled transaction over the trees it touches. The
//! provider is credited through [`credit_provider`] only, whichever entry point
//! completed the contract, and the ledger key `(contract, provider,
//! credit-on-completion)` makes that credit happen at most once.
use crate::collaborators::{Notifier, notify_quietly};
use crate::commission::CommissionRates;
use crate::contract::{Contract, ContractEvent, ContractStatus};
use crate::error::{MarketError, MarketResult, PolicyError, ValidationError};
use crate::ledger::{self, LedgerEntry, LedgerEntryType, Posting, UserBalance};
use crate::otc::{OneTimeCode, OtcPolicy};
use crate::payment::{
    FeeStatus, PaymentMethod, PaymentStatus, PaymentTransaction, PlatformFeeLedger,
};
use crate::store::{self, Store, TxResult, check, require_live_contract};
use crate::types::{Money, TimeStamp};
use chrono::{Duration, Utc};
use sled::Transactional;
use sled::transaction::{TransactionalTree, abort};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub is_valid: bool,
    /// Whether this call wrote the provider's completion credit
    pub credited: bool,
    pub contract: Contract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CashConfirmation {
    pub payment_status: PaymentStatus,
    pub fee_debt_created: bool,
}

// what a verification transaction decided; a rejected code still commits the
// attempt counter, so it is a successful transaction
enum Verification {
    AlreadySettled(Contract),
    Settled(Contract, Option<LedgerEntry>),
    Rejected(ValidationError),
}

pub struct SettlementService {
    store: Store,
    notifier: Arc<dyn Notifier>,
    rates: CommissionRates,
    otc: OtcPolicy,
    fee_due: Duration,
}

impl SettlementService {
    pub fn new(
        store: Store,
        notifier: Arc<dyn Notifier>,
        rates: CommissionRates,
        otc: OtcPolicy,
        fee_due: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            rates,
            otc,
            fee_due,
        }
    }

    /// Issues a one-time code for an accepted contract, replacing any earlier
    /// code. The raw code goes to the client and is returned once.
    pub fn issue_code(&self, contract_id: &str, actor_id: &str) -> MarketResult<String> {
        let (contract, code) = (&self.store.contracts, &self.store.codes).transaction(
            |(contracts, codes)| -> TxResult<_> {
                let contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(actor_id))?;
                if contract.status != ContractStatus::Accepted {
                    return abort(
                        PolicyError::InvalidTransition {
                            from: contract.status,
                            action: "issue a completion code for",
                        }
                        .into(),
                    );
                }

                let Some((otc, code)) = OneTimeCode::issue(contract_id, &self.otc) else {
                    return abort(MarketError::constraint("code expiry out of range"));
                };
                store::write(codes, contract_id, &otc)?;
                Ok((contract, code))
            },
        )?;

        tracing::info!(contract_id, actor_id, "completion code issued");
        notify_quietly(
            self.notifier.as_ref(),
            &contract.client_id,
            "Your service completion code",
            &format!(
                "Share code {} with your provider once the service on contract {} is done",
                code, contract.id
            ),
        );

        Ok(code)
    }

    /// Completes the contract when `code` matches and a confirmed payment
    /// exists, crediting the provider exactly once. Retrying after success
    /// returns the completed contract without writing.
    pub fn verify_otc(
        &self,
        contract_id: &str,
        code: &str,
        actor_id: &str,
    ) -> MarketResult<VerificationOutcome> {
        let now = TimeStamp::new();
        let trees = (
            &self.store.contracts,
            &self.store.codes,
            &self.store.payments,
            &self.store.ledger,
            &self.store.balances,
        );

        let verification = trees.transaction(
            |(contracts, codes, payments, ledger, balances)| -> TxResult<_> {
                let mut contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(actor_id))?;

                if contract.status == ContractStatus::Completed && contract.otp_verified {
                    return Ok(Verification::AlreadySettled(contract));
                }
                if contract.status != ContractStatus::Accepted {
                    return abort(
                        PolicyError::InvalidTransition {
                            from: contract.status,
                            action: "verify a completion code for",
                        }
                        .into(),
                    );
                }

                let Some(mut otc) = store::read::<OneTimeCode>(codes, contract_id)? else {
                    return abort(ValidationError::NoActiveCode.into());
                };
                match otc.check(code, &now) {
                    Ok(()) => {}
                    Err(ValidationError::CodeMismatch { remaining }) => {
                        otc.record_failure();
                        store::write(codes, contract_id, &otc)?;
                        return Ok(Verification::Rejected(ValidationError::CodeMismatch {
                            remaining,
                        }));
                    }
                    Err(err) => return abort(err.into()),
                }

                otc.consume();
                store::write(codes, contract_id, &otc)?;

                contract.otp_verified = true;
                let credit = settle(&mut contract, payments, ledger, balances, &now)?;
                store::write(contracts, contract_id, &contract)?;
                Ok(Verification::Settled(contract, credit))
            },
        )?;

        match verification {
            Verification::AlreadySettled(contract) => {
                tracing::debug!(contract_id, "contract already settled, nothing written");
                Ok(VerificationOutcome {
                    is_valid: true,
                    credited: false,
                    contract,
                })
            }
            Verification::Settled(contract, credit) => {
                self.after_settlement(&contract, credit.as_ref());
                Ok(VerificationOutcome {
                    is_valid: true,
                    credited: credit.is_some(),
                    contract,
                })
            }
            Verification::Rejected(err) => {
                tracing::warn!(contract_id, actor_id, error = %err, "completion code rejected");
                Err(err.into())
            }
        }
    }

    /// Completes an accepted contract without a code. Requires a confirmed
    /// payment and shares the crediting path with [`Self::verify_otc`].
    pub fn complete(&self, contract_id: &str, actor_id: &str) -> MarketResult<Contract> {
        let now = TimeStamp::new();
        let trees = (
            &self.store.contracts,
            &self.store.payments,
            &self.store.ledger,
            &self.store.balances,
        );

        let (contract, credit) = trees.transaction(
            |(contracts, payments, ledger, balances)| -> TxResult<_> {
                let mut contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(actor_id))?;

                if contract.status == ContractStatus::Completed {
                    // already settled; only make sure the credit exists
                    let payment_id = confirmed_payments(payments, contract_id)?
                        .first()
                        .map(|p| p.id.clone());
                    let credit = credit_provider(
                        &contract,
                        payment_id.as_deref(),
                        ledger,
                        balances,
                        &now,
                    )?;
                    return Ok((contract, credit));
                }

                let credit = settle(&mut contract, payments, ledger, balances, &now)?;
                store::write(contracts, contract_id, &contract)?;
                Ok((contract, credit))
            },
        )?;

        match credit {
            Some(entry) => self.after_settlement(&contract, Some(&entry)),
            None => tracing::debug!(contract_id, "completion credit already recorded"),
        }
        Ok(contract)
    }

    /// Records that the client paid in cash. Creates one completed cash
    /// payment and one pending platform fee debt for the provider; repeating
    /// the call changes nothing.
    pub fn confirm_cash_payment(
        &self,
        contract_id: &str,
        actor_id: &str,
    ) -> MarketResult<CashConfirmation> {
        let now = TimeStamp::new();
        let trees = (
            &self.store.contracts,
            &self.store.payments,
            &self.store.fees,
            &self.store.ledger,
            &self.store.balances,
        );

        let (contract, confirmation) = trees.transaction(
            |(contracts, payments, fees, ledger, balances)| -> TxResult<_> {
                let contract = require_live_contract(contracts, contract_id)?;
                check(contract.ensure_party(actor_id))?;
                if !matches!(
                    contract.status,
                    ContractStatus::Accepted | ContractStatus::Completed
                ) {
                    return abort(
                        PolicyError::InvalidTransition {
                            from: contract.status,
                            action: "confirm a cash payment on",
                        }
                        .into(),
                    );
                }

                let commission = match contract.commission {
                    Some(frozen) => frozen.commission,
                    None => match self.rates.breakdown(contract.agreed_price()) {
                        Some(breakdown) => breakdown.commission,
                        None => return abort(MarketError::constraint("commission overflow")),
                    },
                };

                let mut list: Vec<PaymentTransaction> =
                    store::read(payments, contract_id)?.unwrap_or_default();
                if let Some(existing) = list
                    .iter()
                    .find(|p| p.method == PaymentMethod::Cash && p.is_confirmed())
                {
                    let unchanged = CashConfirmation {
                        payment_status: existing.status,
                        fee_debt_created: false,
                    };
                    return Ok((contract, unchanged));
                }

                let payment = PaymentTransaction::new(
                    contract_id.to_string(),
                    PaymentMethod::Cash,
                    PaymentStatus::Completed,
                    contract.settlement_amount(),
                    None,
                );
                let payment_id = payment.id.clone();
                list.push(payment);
                store::write(payments, contract_id, &list)?;

                let fee_key = PlatformFeeLedger::key(&contract.provider_id, contract_id);
                let existing_fee: Option<PlatformFeeLedger> = store::read(fees, &fee_key)?;
                let fee_debt_created = if existing_fee.is_none() {
                    let Some(due_at) = now.plus(self.fee_due) else {
                        return abort(MarketError::constraint("fee due date out of range"));
                    };
                    let fee = PlatformFeeLedger::new(
                        contract.provider_id.clone(),
                        contract_id.to_string(),
                        commission,
                        due_at,
                    );
                    store::insert_unique(fees, &fee_key, &fee)?;
                    ledger::post(
                        ledger,
                        balances,
                        &Posting {
                            user_id: &contract.provider_id,
                            contract_id,
                            payment_id: Some(payment_id.as_str()),
                            entry_type: LedgerEntryType::DebitOnCompletion,
                            magnitude: commission,
                        },
                        &now,
                    )?;
                    true
                } else {
                    false
                };

                Ok((
                    contract,
                    CashConfirmation {
                        payment_status: PaymentStatus::Completed,
                        fee_debt_created,
                    },
                ))
            },
        )?;

        tracing::info!(
            contract_id,
            actor_id,
            fee_debt_created = confirmation.fee_debt_created,
            "cash payment confirmed"
        );
        if confirmation.fee_debt_created {
            notify_quietly(
                self.notifier.as_ref(),
                &contract.provider_id,
                "Platform fee due",
                &format!(
                    "Contract {} was paid in cash; the platform commission is now due",
                    contract.id
                ),
            );
        }

        Ok(confirmation)
    }

    /// Write side of the external payment-confirmed signal. Idempotent on the
    /// gateway `reference`: a repeat updates the status of the same row.
    pub fn record_gateway_payment(
        &self,
        contract_id: &str,
        reference: &str,
        amount: Money,
        status: PaymentStatus,
    ) -> MarketResult<PaymentTransaction> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount.into());
        }

        let now = TimeStamp::new();
        let payment = (&self.store.contracts, &self.store.payments).transaction(
            |(contracts, payments)| -> TxResult<_> {
                require_live_contract(contracts, contract_id)?;

                let mut list: Vec<PaymentTransaction> =
                    store::read(payments, contract_id)?.unwrap_or_default();
                let existing = list.iter_mut().find(|p| {
                    p.method == PaymentMethod::Gateway && p.reference.as_deref() == Some(reference)
                });
                let payment = match existing {
                    Some(payment) => {
                        payment.update_status(status, &now);
                        payment.clone()
                    }
                    None => {
                        let payment = PaymentTransaction::new(
                            contract_id.to_string(),
                            PaymentMethod::Gateway,
                            status,
                            amount,
                            Some(reference.to_string()),
                        );
                        list.push(payment.clone());
                        payment
                    }
                };
                store::write(payments, contract_id, &list)?;
                Ok(payment)
            },
        )?;

        tracing::info!(
            contract_id,
            reference,
            status = ?payment.status,
            "gateway payment recorded"
        );
        Ok(payment)
    }

    pub fn payments(&self, contract_id: &str) -> MarketResult<Vec<PaymentTransaction>> {
        Ok(Store::get::<Vec<PaymentTransaction>>(&self.store.payments, contract_id)?
            .unwrap_or_default())
    }

    pub fn list_confirmed_payments(
        &self,
        contract_id: &str,
    ) -> MarketResult<Vec<PaymentTransaction>> {
        Ok(self
            .payments(contract_id)?
            .into_iter()
            .filter(PaymentTransaction::is_confirmed)
            .collect())
    }

    /// Marks the provider's fee debt for a contract as paid and reduces their
    /// `owed` balance. Paying twice is a no-op.
    pub fn settle_platform_fee(
        &self,
        contract_id: &str,
        provider_id: &str,
    ) -> MarketResult<PlatformFeeLedger> {
        let now = TimeStamp::new();
        let key = PlatformFeeLedger::key(provider_id, contract_id);

        let trees = (&self.store.fees, &self.store.ledger, &self.store.balances);
        let (fee, entry) = trees.transaction(
            |(fees, ledger, balances)| -> TxResult<_> {
                let mut fee: PlatformFeeLedger = store::require(fees, &key, "platform fee")?;
                if fee.status == FeeStatus::Paid {
                    return Ok((fee, None));
                }

                fee.status = FeeStatus::Paid;
                fee.paid_at = Some(now.clone());
                store::write(fees, &key, &fee)?;

                let entry = ledger::post(
                    ledger,
                    balances,
                    &Posting {
                        user_id: provider_id,
                        contract_id,
                        payment_id: None,
                        entry_type: LedgerEntryType::CreditOnPayment,
                        magnitude: fee.amount,
                    },
                    &now,
                )?;
                Ok((fee, entry))
            },
        )?;

        if entry.is_some() {
            tracing::info!(contract_id, provider_id, amount = %fee.amount, "platform fee paid");
        }
        Ok(fee)
    }

    /// Flags pending fee debts past their due date. Returns how many changed.
    pub fn mark_overdue_fees(&self, now: &TimeStamp<Utc>) -> MarketResult<usize> {
        let mut changed = 0;
        for item in self.store.fees.iter() {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();

            let flagged = self.store.fees.transaction(|fees| -> TxResult<_> {
                let Some(mut fee) = store::read::<PlatformFeeLedger>(fees, &key)? else {
                    return Ok(false);
                };
                if !fee.is_overdue(now) {
                    return Ok(false);
                }
                fee.status = FeeStatus::Overdue;
                store::write(fees, &key, &fee)?;
                Ok(true)
            })?;

            if flagged {
                tracing::warn!(fee = %key, "platform fee overdue");
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn platform_fees_for_provider(
        &self,
        provider_id: &str,
    ) -> MarketResult<Vec<PlatformFeeLedger>> {
        Ok(Store::scan::<PlatformFeeLedger>(&self.store.fees)?
            .into_iter()
            .filter(|fee| fee.provider_id == provider_id)
            .collect())
    }

    pub fn one_time_code(&self, contract_id: &str) -> MarketResult<Option<OneTimeCode>> {
        Store::get(&self.store.codes, contract_id)
    }

    /// Drops used, expired and exhausted codes. Returns how many were removed.
    pub fn purge_expired_codes(&self, now: &TimeStamp<Utc>) -> MarketResult<usize> {
        let mut removed = 0;
        for item in self.store.codes.iter() {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();

            let purged = self.store.codes.transaction(|codes| -> TxResult<_> {
                match store::read::<OneTimeCode>(codes, &key)? {
                    Some(otc) if otc.is_spent(now) => {
                        codes.remove(key.as_bytes())?;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })?;
            if purged {
                removed += 1;
            }
        }
        tracing::debug!(removed, "purged spent completion codes");
        Ok(removed)
    }

    /// Balances of a user as seen by the ledger
    pub fn get_user(&self, user_id: &str) -> MarketResult<UserBalance> {
        ledger::balance_of(&self.store, user_id)
    }

    pub fn ledger_entries(&self, user_id: &str) -> MarketResult<Vec<LedgerEntry>> {
        ledger::entries_for_user(&self.store, user_id)
    }

    fn after_settlement(&self, contract: &Contract, credit: Option<&LedgerEntry>) {
        let Some(entry) = credit else {
            return;
        };
        tracing::info!(
            contract_id = %contract.id,
            provider_id = %contract.provider_id,
            amount = %entry.amount,
            balance_after = %entry.balance_after,
            otp_verified = contract.otp_verified,
            "contract settled"
        );
        notify_quietly(
            self.notifier.as_ref(),
            &contract.provider_id,
            "Service completed",
            &format!(
                "Contract {} is complete and {} was added to your earnings",
                contract.id, entry.amount
            ),
        );
    }
}

fn confirmed_payments(
    payments: &TransactionalTree,
    contract_id: &str,
) -> TxResult<Vec<PaymentTransaction>> {
    let list: Vec<PaymentTransaction> = store::read(payments, contract_id)?.unwrap_or_default();
    Ok(list.into_iter().filter(PaymentTransaction::is_confirmed).collect())
}

/// Requires a confirmed payment, marks the contract completed and credits the
/// provider. Shared by both completion entry points.
fn settle(
    contract: &mut Contract,
    payments: &TransactionalTree,
    ledger: &TransactionalTree,
    balances: &TransactionalTree,
    now: &TimeStamp<Utc>,
) -> TxResult<Option<LedgerEntry>> {
    check(contract.apply(ContractEvent::Settled, now))?;

    let confirmed = confirmed_payments(payments, &contract.id)?;
    let Some(payment) = confirmed.first() else {
        return abort(ValidationError::NoConfirmedPayment.into());
    };
    credit_provider(contract, Some(&payment.id), ledger, balances, now)
}

/// The single crediting routine. Writes nothing when the completion credit
/// for this contract already exists.
fn credit_provider(
    contract: &Contract,
    payment_id: Option<&str>,
    ledger: &TransactionalTree,
    balances: &TransactionalTree,
    now: &TimeStamp<Utc>,
) -> TxResult<Option<LedgerEntry>> {
    ledger::post(
        ledger,
        balances,
        &Posting {
            user_id: &contract.provider_id,
            contract_id: &contract.id,
            payment_id,
            entry_type: LedgerEntryType::CreditOnCompletion,
            magnitude: contract.settlement_amount(),
        },
        now,
    )
}
