use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{decimal::round_to, error::AccountingError};

/// One currency's funds for one agent, split into a free and a reserved part.
///
/// Every amount is rounded (truncated) to `rounding_decimals` on entry, so
/// the invariant `free >= 0 && reserved >= 0` holds at that precision and
/// `total == free + reserved` exactly. A reservation is created when an order
/// is admitted and resolved on fill (`commit`) or cancel (`release`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    initial: Decimal,
    free: Decimal,
    reserved: Decimal,
    symbol: Option<String>,
    rounding_decimals: u32,
}

impl Balance {
    pub fn new(
        initial: Decimal,
        symbol: Option<String>,
        rounding_decimals: u32,
    ) -> Result<Self, AccountingError> {
        if rounding_decimals == 0 {
            return Err(AccountingError::InvalidDecimalPlaces(rounding_decimals));
        }
        let initial = round_to(initial, rounding_decimals);
        Ok(Self {
            initial,
            free: initial,
            reserved: Decimal::ZERO,
            symbol,
            rounding_decimals,
        })
    }

    pub fn initial(&self) -> Decimal {
        self.initial
    }

    pub fn free(&self) -> Decimal {
        self.free
    }

    pub fn reserved(&self) -> Decimal {
        self.reserved
    }

    pub fn total(&self) -> Decimal {
        self.free + self.reserved
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn rounding_decimals(&self) -> u32 {
        self.rounding_decimals
    }

    fn round(&self, amount: Decimal) -> Decimal {
        round_to(amount, self.rounding_decimals)
    }

    /// Moves `amount` from free to reserved. Returns the rounded amount
    /// actually moved.
    pub fn reserve(&mut self, amount: Decimal) -> Result<Decimal, AccountingError> {
        let amount = self.round(amount);
        if amount > self.free {
            return Err(AccountingError::InsufficientFree {
                requested: amount,
                free: self.free,
            });
        }
        self.free -= amount;
        self.reserved += amount;
        Ok(amount)
    }

    /// Moves `amount` back from reserved to free.
    pub fn release(&mut self, amount: Decimal) -> Result<Decimal, AccountingError> {
        let amount = self.round(amount);
        if amount > self.reserved {
            return Err(AccountingError::InsufficientReserved {
                requested: amount,
                reserved: self.reserved,
            });
        }
        self.reserved -= amount;
        self.free += amount;
        Ok(amount)
    }

    /// Removes `amount` from reserved for good (the fill settled it).
    pub fn commit(&mut self, amount: Decimal) -> Result<Decimal, AccountingError> {
        let amount = self.round(amount);
        if amount > self.reserved {
            return Err(AccountingError::InsufficientReserved {
                requested: amount,
                reserved: self.reserved,
            });
        }
        self.reserved -= amount;
        Ok(amount)
    }

    /// Adds `amount` to free.
    pub fn credit(&mut self, amount: Decimal) -> Decimal {
        let amount = self.round(amount);
        self.free += amount;
        amount
    }

    /// Subtracts `amount` from free.
    pub fn debit(&mut self, amount: Decimal) -> Result<Decimal, AccountingError> {
        let amount = self.round(amount);
        if amount > self.free {
            return Err(AccountingError::InsufficientFree {
                requested: amount,
                free: self.free,
            });
        }
        self.free -= amount;
        Ok(amount)
    }
}

/// Checkpoint mirror of [`Balance`]: the 6-key map with packed decimals.
/// `total` is derived and ignored on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheckpoint {
    #[serde(with = "crate::serde::packed")]
    pub initial: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub free: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub reserved: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub total: Decimal,
    pub symbol: Option<String>,
    pub rounding_decimals: u32,
}

impl From<&Balance> for BalanceCheckpoint {
    fn from(balance: &Balance) -> Self {
        Self {
            initial: balance.initial,
            free: balance.free,
            reserved: balance.reserved,
            total: balance.total(),
            symbol: balance.symbol.clone(),
            rounding_decimals: balance.rounding_decimals,
        }
    }
}

impl TryFrom<BalanceCheckpoint> for Balance {
    type Error = AccountingError;

    fn try_from(ckpt: BalanceCheckpoint) -> Result<Self, Self::Error> {
        if ckpt.rounding_decimals == 0 {
            return Err(AccountingError::InvalidDecimalPlaces(ckpt.rounding_decimals));
        }
        Ok(Self {
            initial: ckpt.initial,
            free: ckpt.free,
            reserved: ckpt.reserved,
            symbol: ckpt.symbol,
            rounding_decimals: ckpt.rounding_decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(initial: Decimal) -> Balance {
        Balance::new(initial, Some("USDT".into()), 2).unwrap()
    }

    #[test]
    fn construction_rejects_zero_decimals() {
        assert!(matches!(
            Balance::new(dec!(1), None, 0),
            Err(AccountingError::InvalidDecimalPlaces(0))
        ));
    }

    #[test]
    fn amounts_round_on_entry() {
        let mut bal = balance(dec!(100));
        let reserved = bal.reserve(dec!(10.999)).unwrap();
        assert_eq!(reserved, dec!(10.99));
        assert_eq!(bal.free(), dec!(89.01));
        assert_eq!(bal.reserved(), dec!(10.99));
        assert_eq!(bal.total(), dec!(100));
    }

    #[test]
    fn reserve_release_commit_cycle() {
        let mut bal = balance(dec!(50));
        bal.reserve(dec!(20)).unwrap();
        bal.release(dec!(5)).unwrap();
        assert_eq!(bal.free(), dec!(35));
        assert_eq!(bal.reserved(), dec!(15));

        bal.commit(dec!(15)).unwrap();
        assert_eq!(bal.reserved(), dec!(0));
        assert_eq!(bal.total(), dec!(35));
    }

    #[test]
    fn overdrafts_fail() {
        let mut bal = balance(dec!(10));
        assert!(matches!(
            bal.reserve(dec!(10.01)),
            Err(AccountingError::InsufficientFree { .. })
        ));
        assert!(matches!(
            bal.release(dec!(0.01)),
            Err(AccountingError::InsufficientReserved { .. })
        ));
        assert!(matches!(
            bal.commit(dec!(0.01)),
            Err(AccountingError::InsufficientReserved { .. })
        ));
        assert!(matches!(
            bal.debit(dec!(11)),
            Err(AccountingError::InsufficientFree { .. })
        ));
        // Failed operations leave the balance untouched.
        assert_eq!(bal.free(), dec!(10));
        assert_eq!(bal.reserved(), dec!(0));
    }

    #[test]
    fn credit_and_debit_touch_free_only() {
        let mut bal = balance(dec!(1));
        bal.credit(dec!(2.5));
        bal.debit(dec!(0.5)).unwrap();
        assert_eq!(bal.free(), dec!(3));
        assert_eq!(bal.reserved(), dec!(0));
    }

    #[test]
    fn checkpoint_roundtrip() {
        let mut bal = balance(dec!(100));
        bal.reserve(dec!(30)).unwrap();

        let json = serde_json::to_string(&BalanceCheckpoint::from(&bal)).unwrap();
        let restored: Balance = serde_json::from_str::<BalanceCheckpoint>(&json)
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(restored, bal);
    }
}
