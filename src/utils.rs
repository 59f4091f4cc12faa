//! Identifier helpers
use bech32::Bech32m;
use uuid7::uuid7;

pub const CONTRACT_HRP: &str = "contract_";
pub const BID_HRP: &str = "bid_";
pub const PAYMENT_HRP: &str = "payment_";
pub const LEDGER_HRP: &str = "ledger_";
pub const FEE_HRP: &str = "fee_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Same as [`new_uuid_to_bech32`] for the crate's fixed prefixes, which always parse.
pub(crate) fn new_id(hrp: &'static str) -> String {
    new_uuid_to_bech32(hrp).unwrap_or_else(|_| format!("{}{}", hrp, uuid7()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_prefixes_encode() {
        for hrp in [CONTRACT_HRP, BID_HRP, PAYMENT_HRP, LEDGER_HRP, FEE_HRP] {
            let id = new_uuid_to_bech32(hrp).unwrap();
            assert!(id.starts_with(hrp));
        }
    }
}
