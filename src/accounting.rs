pub mod balance;
pub mod balances;
pub mod loan;

pub use balance::{Balance, BalanceCheckpoint};
pub use balances::{Balances, BalancesCheckpoint, LoanCheckpoint};
pub use loan::{Collateral, Loan};
