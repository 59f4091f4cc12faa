//! One-time codes confirming in-person completion of a service.
//!
//! Only the hash of `contract_id:code` is ever stored. Codes live in an arena
//! keyed by contract id, so issuing a new code replaces the previous one, and
//! expired entries are removed by an explicit sweep rather than on read.
use crate::error::ValidationError;
use crate::types::TimeStamp;
use chrono::{Duration, Utc};
use rand::Rng;

pub const DEFAULT_OTC_TTL_MINUTES: i64 = 15;
pub const DEFAULT_OTC_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtcPolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
}

impl Default for OtcPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(DEFAULT_OTC_TTL_MINUTES),
            max_attempts: DEFAULT_OTC_MAX_ATTEMPTS,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    #[n(0)]
    pub contract_id: String,
    #[n(1)]
    pub code_hash: String,
    #[n(2)]
    pub attempts: u32,
    #[n(3)]
    pub max_attempts: u32,
    #[n(4)]
    pub is_used: bool,
    #[n(5)]
    pub issued_at: TimeStamp<Utc>,
    #[n(6)]
    pub expires_at: TimeStamp<Utc>,
}

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(0..1_000_000))
}

pub fn hash_code(contract_id: &str, code: &str) -> String {
    sha256::digest(format!("{contract_id}:{code}").as_bytes())
}

impl OneTimeCode {
    /// Issues a fresh code. The raw code is returned alongside the record and
    /// must not be persisted. `None` when the expiry is not representable.
    pub fn issue(contract_id: &str, policy: &OtcPolicy) -> Option<(Self, String)> {
        let code = generate_code();
        let issued_at = TimeStamp::new();
        let record = Self {
            contract_id: contract_id.to_string(),
            code_hash: hash_code(contract_id, &code),
            attempts: 0,
            max_attempts: policy.max_attempts,
            is_used: false,
            expires_at: issued_at.plus(policy.ttl)?,
            issued_at,
        };
        Some((record, code))
    }

    pub fn is_expired(&self, now: &TimeStamp<Utc>) -> bool {
        *now >= self.expires_at
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Whether the record can be dropped from the arena
    pub fn is_spent(&self, now: &TimeStamp<Utc>) -> bool {
        self.is_used || self.is_expired(now) || self.remaining_attempts() == 0
    }

    /// Checks `code` without mutating. A `CodeMismatch` reports the attempts left
    /// once the failure has been recorded.
    pub fn check(&self, code: &str, now: &TimeStamp<Utc>) -> Result<(), ValidationError> {
        if self.is_used {
            return Err(ValidationError::CodeUsed);
        }
        if self.is_expired(now) {
            return Err(ValidationError::CodeExpired);
        }
        if self.attempts >= self.max_attempts {
            return Err(ValidationError::AttemptsExhausted);
        }
        if hash_code(&self.contract_id, code) != self.code_hash {
            return Err(ValidationError::CodeMismatch {
                remaining: self.remaining_attempts().saturating_sub(1),
            });
        }
        Ok(())
    }

    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn consume(&mut self) {
        self.is_used = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_is_bound_to_contract() {
        assert_ne!(hash_code("contract_a", "123456"), hash_code("contract_b", "123456"));
    }

    #[test]
    fn issued_code_checks_and_never_stores_raw() {
        let (otc, code) = OneTimeCode::issue("contract_a", &OtcPolicy::default()).unwrap();

        assert_ne!(otc.code_hash, code);
        assert_eq!(otc.check(&code, &TimeStamp::new()), Ok(()));
    }

    #[test]
    fn mismatch_then_exhaustion() {
        let policy = OtcPolicy {
            ttl: Duration::minutes(5),
            max_attempts: 2,
        };
        let (mut otc, code) = OneTimeCode::issue("contract_a", &policy).unwrap();
        let now = TimeStamp::new();

        assert_eq!(
            otc.check("wrong", &now),
            Err(ValidationError::CodeMismatch { remaining: 1 })
        );
        otc.record_failure();
        otc.record_failure();

        assert_eq!(otc.check(&code, &now), Err(ValidationError::AttemptsExhausted));
    }

    #[test]
    fn expired_code_is_rejected() {
        let (otc, code) = OneTimeCode::issue("contract_a", &OtcPolicy::default()).unwrap();
        let later = TimeStamp::new()
            .plus(Duration::minutes(DEFAULT_OTC_TTL_MINUTES + 1))
            .unwrap();

        assert_eq!(otc.check(&code, &later), Err(ValidationError::CodeExpired));
        assert!(otc.is_spent(&later));
    }

    #[test]
    fn unrepresentable_expiry_issues_nothing() {
        let policy = OtcPolicy {
            ttl: Duration::MAX,
            max_attempts: 5,
        };
        assert!(OneTimeCode::issue("contract_a", &policy).is_none());
    }
}
