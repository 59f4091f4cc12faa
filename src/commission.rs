//! Platform commission and tax breakdown
use crate::types::Money;

pub const DEFAULT_COMMISSION_BPS: u32 = 800;
pub const DEFAULT_TAX_BPS: u32 = 1_900;

/// Rates in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionRates {
    pub commission_bps: u32,
    pub tax_bps: u32,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            commission_bps: DEFAULT_COMMISSION_BPS,
            tax_bps: DEFAULT_TAX_BPS,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionBreakdown {
    #[n(0)]
    pub commission: Money,
    #[n(1)]
    pub net_to_provider: Money,
    #[n(2)]
    pub commission_with_tax: Money,
}

impl CommissionRates {
    /// Splits `price` into the platform commission, the provider's net and the
    /// commission including tax. Each component is rounded to the cent.
    /// `None` only when the arithmetic leaves the representable range.
    pub fn breakdown(&self, price: Money) -> Option<CommissionBreakdown> {
        let commission = price.apply_bps(self.commission_bps)?;
        let tax = price.apply_bps(self.tax_bps)?;

        Some(CommissionBreakdown {
            commission,
            net_to_provider: price.checked_sub(commission)?,
            commission_with_tax: commission.checked_add(tax)?,
        })
    }

    /// Price including tax
    pub fn total_with_tax(&self, price: Money) -> Option<Money> {
        price.checked_add(price.apply_bps(self.tax_bps)?)
    }
}
