use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    accounting::{
        balance::{Balance, BalanceCheckpoint},
        loan::{Collateral, Loan},
    },
    decimal::round_to,
    error::AccountingError,
    types::{Currency, LoanId, OrderDirection},
};

/// The complete account of one agent on one trading pair: both balances,
/// the open loans, and the per-currency loan/collateral aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct Balances {
    pub base: Balance,
    pub quote: Balance,
    base_decimals: u32,
    quote_decimals: u32,
    base_loan: Decimal,
    quote_loan: Decimal,
    base_collateral: Decimal,
    quote_collateral: Decimal,
    loans: BTreeMap<LoanId, Loan>,
    next_loan_id: u64,
}

impl Balances {
    pub fn new(
        base: Balance,
        quote: Balance,
        base_decimals: u32,
        quote_decimals: u32,
    ) -> Result<Self, AccountingError> {
        if base_decimals == 0 {
            return Err(AccountingError::InvalidDecimalPlaces(base_decimals));
        }
        if quote_decimals == 0 {
            return Err(AccountingError::InvalidDecimalPlaces(quote_decimals));
        }
        Ok(Self {
            base,
            quote,
            base_decimals,
            quote_decimals,
            base_loan: Decimal::ZERO,
            quote_loan: Decimal::ZERO,
            base_collateral: Decimal::ZERO,
            quote_collateral: Decimal::ZERO,
            loans: BTreeMap::new(),
            next_loan_id: 0,
        })
    }

    pub fn balance(&self, currency: Currency) -> &Balance {
        match currency {
            Currency::Base => &self.base,
            Currency::Quote => &self.quote,
        }
    }

    pub fn balance_mut(&mut self, currency: Currency) -> &mut Balance {
        match currency {
            Currency::Base => &mut self.base,
            Currency::Quote => &mut self.quote,
        }
    }

    pub fn base_loan(&self) -> Decimal {
        self.base_loan
    }

    pub fn quote_loan(&self) -> Decimal {
        self.quote_loan
    }

    pub fn base_collateral(&self) -> Decimal {
        self.base_collateral
    }

    pub fn quote_collateral(&self) -> Decimal {
        self.quote_collateral
    }

    pub fn loan(&self, id: LoanId) -> Result<&Loan, AccountingError> {
        self.loans.get(&id).ok_or(AccountingError::UnknownLoan(id))
    }

    pub fn loans(&self) -> impl Iterator<Item = (LoanId, &Loan)> {
        self.loans.iter().map(|(id, loan)| (*id, loan))
    }

    pub fn has_loans(&self) -> bool {
        !self.loans.is_empty()
    }

    fn decimals(&self, currency: Currency) -> u32 {
        match currency {
            Currency::Base => self.base_decimals,
            Currency::Quote => self.quote_decimals,
        }
    }

    /// Opens a leveraged position of size `volume` at `price`.
    ///
    /// A BUY loan borrows the quote notional `price * volume` and reserves
    /// `notional * (1 + 1/leverage)` quote — the borrowed principal plus the
    /// agent's own collateral. A SELL loan mirrors this on the base side with
    /// `volume * (1 + 1/leverage)`. Fails without side effects when the agent
    /// cannot put up the collateral.
    pub fn open_loan(
        &mut self,
        direction: OrderDirection,
        volume: Decimal,
        price: Decimal,
        leverage: Decimal,
    ) -> Result<LoanId, AccountingError> {
        if leverage <= Decimal::ZERO {
            return Err(AccountingError::InvalidLeverage(leverage));
        }

        let currency = match direction {
            OrderDirection::Buy => Currency::Quote,
            OrderDirection::Sell => Currency::Base,
        };
        let decimals = self.decimals(currency);
        let principal = match direction {
            OrderDirection::Buy => round_to(price * volume, decimals),
            OrderDirection::Sell => round_to(volume, decimals),
        };
        let collateral = round_to(principal / leverage, decimals);

        let balance = self.balance_mut(currency);
        balance.credit(principal);
        if let Err(e) = balance.reserve(principal + collateral) {
            // The reservation failed on the agent's own collateral; take the
            // lent principal back out.
            balance.debit(principal)?;
            return Err(e);
        }

        let split = match currency {
            Currency::Base => Collateral::base_only(collateral),
            Currency::Quote => Collateral::quote_only(collateral),
        };
        match currency {
            Currency::Base => {
                self.base_loan += principal;
                self.base_collateral += collateral;
            }
            Currency::Quote => {
                self.quote_loan += principal;
                self.quote_collateral += collateral;
            }
        }

        let id = LoanId(self.next_loan_id);
        self.next_loan_id += 1;
        self.loans.insert(id, Loan::new(principal, direction, split));
        Ok(id)
    }

    /// Closes a loan: releases its collateral, repays the principal out of
    /// the loan currency's free funds, and applies the realized `pnl` to the
    /// opposite currency. Fails without side effects when the account cannot
    /// cover repayment or a negative P/L.
    pub fn close_loan(&mut self, id: LoanId, pnl: Decimal) -> Result<Loan, AccountingError> {
        let loan = *self.loan(id)?;
        let currency = loan.currency();
        let opposite = match currency {
            Currency::Base => Currency::Quote,
            Currency::Quote => Currency::Base,
        };
        let own_collateral = match currency {
            Currency::Base => loan.collateral().base(),
            Currency::Quote => loan.collateral().quote(),
        };

        // Affordability first, so a failure leaves the account intact.
        let free_after_release = self.balance(currency).free() + own_collateral;
        if free_after_release < loan.amount() {
            return Err(AccountingError::InsufficientFree {
                requested: loan.amount(),
                free: free_after_release,
            });
        }
        if pnl < Decimal::ZERO {
            let opposite_collateral = match opposite {
                Currency::Base => loan.collateral().base(),
                Currency::Quote => loan.collateral().quote(),
            };
            let free_opposite = self.balance(opposite).free() + opposite_collateral;
            if free_opposite < -pnl {
                return Err(AccountingError::InsufficientFree {
                    requested: -pnl,
                    free: free_opposite,
                });
            }
        }

        self.base.release(loan.collateral().base())?;
        self.quote.release(loan.collateral().quote())?;
        self.balance_mut(currency).debit(loan.amount())?;
        if pnl >= Decimal::ZERO {
            self.balance_mut(opposite).credit(pnl);
        } else {
            self.balance_mut(opposite).debit(-pnl)?;
        }

        match currency {
            Currency::Base => {
                self.base_loan -= loan.amount();
                self.base_collateral -= loan.collateral().base();
            }
            Currency::Quote => {
                self.quote_loan -= loan.amount();
                self.quote_collateral -= loan.collateral().quote();
            }
        }
        self.loans.remove(&id);
        Ok(loan)
    }

    pub fn checkpoint(&self) -> BalancesCheckpoint {
        BalancesCheckpoint {
            base_decimals: self.base_decimals,
            quote_decimals: self.quote_decimals,
            base_loan: self.base_loan,
            quote_loan: self.quote_loan,
            base_collateral: self.base_collateral,
            quote_collateral: self.quote_collateral,
            base: (&self.base).into(),
            quote: (&self.quote).into(),
            loans: self
                .loans
                .iter()
                .map(|(id, loan)| LoanCheckpoint {
                    id: *id,
                    amount: loan.amount(),
                    currency: loan.currency(),
                    base_collateral: loan.collateral().base(),
                    quote_collateral: loan.collateral().quote(),
                })
                .collect(),
        }
    }

    pub fn from_checkpoint(ckpt: BalancesCheckpoint) -> Result<Self, AccountingError> {
        let mut balances = Self::new(
            ckpt.base.try_into()?,
            ckpt.quote.try_into()?,
            ckpt.base_decimals,
            ckpt.quote_decimals,
        )?;
        balances.base_loan = ckpt.base_loan;
        balances.quote_loan = ckpt.quote_loan;
        balances.base_collateral = ckpt.base_collateral;
        balances.quote_collateral = ckpt.quote_collateral;
        for loan in ckpt.loans {
            let direction = match loan.currency {
                Currency::Quote => OrderDirection::Buy,
                Currency::Base => OrderDirection::Sell,
            };
            let split = match loan.currency {
                Currency::Quote => Collateral::quote_only(loan.quote_collateral),
                Currency::Base => Collateral::base_only(loan.base_collateral),
            };
            balances
                .loans
                .insert(loan.id, Loan::new(loan.amount, direction, split));
            balances.next_loan_id = balances.next_loan_id.max(loan.id.0 + 1);
        }
        Ok(balances)
    }
}

/// Checkpoint entry for one loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanCheckpoint {
    pub id: LoanId,
    #[serde(with = "crate::serde::packed")]
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(with = "crate::serde::packed")]
    pub base_collateral: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub quote_collateral: Decimal,
}

/// Checkpoint mirror of [`Balances`]: the 9-key map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesCheckpoint {
    pub base_decimals: u32,
    pub quote_decimals: u32,
    #[serde(with = "crate::serde::packed")]
    pub base_loan: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub quote_loan: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub base_collateral: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub quote_collateral: Decimal,
    pub base: BalanceCheckpoint,
    pub quote: BalanceCheckpoint,
    #[serde(rename = "Loans")]
    pub loans: Vec<LoanCheckpoint>,
}
