//! Shared value types: timestamps and money
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Manual impls: the derive would require `T: Ord`, which `Utc` lacks.
impl<T: TimeZone + Eq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
            .unwrap_or_else(|| TimeStamp(DateTime::<Utc>::UNIX_EPOCH))
    }
    /// `None` when the result falls outside the range the nanosecond codec
    /// can store (roughly 1677 to 2262).
    pub fn plus(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add_signed(duration).and_then(Self::storable)
    }
    pub fn minus(&self, duration: Duration) -> Option<Self> {
        self.0.checked_sub_signed(duration).and_then(Self::storable)
    }
    fn storable(at: DateTime<Utc>) -> Option<Self> {
        at.timestamp_nanos_opt().map(|_| TimeStamp(at))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// An amount in minor units (cents). Signed so ledger deltas can be negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(cents: i64) -> Self {
        Self(cents)
    }
    /// Whole currency units, e.g. `Money::from_major(20_000)` is 20000.00
    pub fn from_major(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }
    pub fn minor(&self) -> i64 {
        self.0
    }
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
    pub fn checked_neg(self) -> Option<Money> {
        self.0.checked_neg().map(Money)
    }
    /// Applies a rate in basis points, rounding half away from zero to the cent.
    pub fn apply_bps(self, bps: u32) -> Option<Money> {
        let scaled = i128::from(self.0) * i128::from(bps);
        let half = if scaled < 0 { -5_000 } else { 5_000 };
        i64::try_from((scaled + half) / 10_000).ok().map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Money(d.i64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn arithmetic_outside_storable_range_is_none() {
        let now = TimeStamp::new();

        assert!(now.plus(Duration::days(30)).is_some());
        assert!(now.plus(Duration::MAX).is_none());
        assert!(now.minus(Duration::MAX).is_none());
        // in chrono's range but past what fits in i64 nanoseconds
        assert!(now.plus(Duration::days(365 * 300)).is_none());
    }

    #[test]
    fn money_display_pads_cents() {
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_major(1600).to_string(), "1600.00");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn apply_bps_rounds_half_up_to_the_cent() {
        // 8% of 0.06 is 0.0048, rounds to 0.00; 8% of 0.07 is 0.0056, rounds to 0.01
        assert_eq!(Money::from_minor(6).apply_bps(800), Some(Money::ZERO));
        assert_eq!(Money::from_minor(7).apply_bps(800), Some(Money::from_minor(1)));
        assert_eq!(
            Money::from_major(20_000).apply_bps(800),
            Some(Money::from_major(1_600))
        );
    }

    #[test]
    fn checked_add_reports_overflow() {
        assert_eq!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)), None);
    }
}
