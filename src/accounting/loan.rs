use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Currency, OrderDirection};

/// Collateral split across the two legs of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collateral {
    base: Decimal,
    quote: Decimal,
}

impl Collateral {
    pub fn base_only(amount: Decimal) -> Self {
        Self {
            base: amount,
            quote: Decimal::ZERO,
        }
    }

    pub fn quote_only(amount: Decimal) -> Self {
        Self {
            base: Decimal::ZERO,
            quote: amount,
        }
    }

    pub fn base(&self) -> Decimal {
        self.base
    }

    pub fn quote(&self) -> Decimal {
        self.quote
    }
}

/// A leveraged position: the borrowed principal plus the collateral
/// encumbered against it.
///
/// Invariant: a BUY-direction loan is quote-denominated (quote was borrowed
/// to buy base), a SELL loan base-denominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loan {
    amount: Decimal,
    direction: OrderDirection,
    collateral: Collateral,
}

impl Loan {
    pub fn new(amount: Decimal, direction: OrderDirection, collateral: Collateral) -> Self {
        Self {
            amount,
            direction,
            collateral,
        }
    }

    /// Outstanding principal, denominated in [`Self::currency`].
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }

    pub fn collateral(&self) -> Collateral {
        self.collateral
    }

    /// The currency the principal is denominated in.
    pub fn currency(&self) -> Currency {
        match self.direction {
            OrderDirection::Buy => Currency::Quote,
            OrderDirection::Sell => Currency::Base,
        }
    }
}
