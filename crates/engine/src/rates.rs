//! XDR → ICP rate lookup
//!
//! A missing rate for a day is not an error: conversions for that day
//! produce 0 ICP and every other day is unaffected.

use crate::types::ConversionRate;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Source of daily XDR → ICP rates
pub trait RateLookup {
    /// Rate for `day`, `None` when no rate is known
    fn rate_on(&self, day: NaiveDate) -> Option<Decimal>;

    /// ICP price in USD for `day`, if known
    fn icp_usd_on(&self, _day: NaiveDate) -> Option<Decimal> {
        None
    }

    /// Convert an XDR amount using the rate of `day` (0 without a rate)
    fn to_icp(&self, day: NaiveDate, xdr: Decimal) -> Decimal {
        xdr * self.rate_on(day).unwrap_or(Decimal::ZERO)
    }
}

/// Daily rates keyed by day
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    by_day: BTreeMap<NaiveDate, ConversionRate>,
}

impl RateTable {
    pub fn new(rates: impl IntoIterator<Item = ConversionRate>) -> Self {
        Self {
            by_day: rates.into_iter().map(|r| (r.day_utc, r)).collect(),
        }
    }

    pub fn get(&self, day: NaiveDate) -> Option<&ConversionRate> {
        self.by_day.get(&day)
    }

    /// Most recent day with a known rate
    pub fn latest(&self) -> Option<&ConversionRate> {
        self.by_day.values().rev().find(|r| r.xdr_to_icp.is_some())
    }

    pub fn len(&self) -> usize {
        self.by_day.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_day.is_empty()
    }
}

impl RateLookup for RateTable {
    fn rate_on(&self, day: NaiveDate) -> Option<Decimal> {
        self.by_day.get(&day).and_then(|r| r.xdr_to_icp)
    }

    fn icp_usd_on(&self, day: NaiveDate) -> Option<Decimal> {
        self.by_day.get(&day).and_then(|r| r.icp_to_usd)
    }
}

/// The same rate for every day
#[derive(Debug, Clone, Copy)]
pub struct FlatRate(pub Decimal);

impl RateLookup for FlatRate {
    fn rate_on(&self, _day: NaiveDate) -> Option<Decimal> {
        Some(self.0)
    }
}
