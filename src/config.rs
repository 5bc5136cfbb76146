use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    accounting::{Balance, Balances},
    decimal::f64_to_decimal,
    error::{MultibookError, MultibookResult, SimulationError},
    exchange::{FeePolicyConfig, MultiBookExchangeAgent, fee_policy_from_config},
    types::{AgentId, Timespan},
};

fn default_block_dim() -> u32 {
    1
}

fn default_book_count() -> u32 {
    1
}

fn default_maintenance_margin() -> f64 {
    0.25
}

fn default_decimals() -> u32 {
    crate::decimal::DEFAULT_DECIMAL_PLACES
}

/// Initial funding and precision of one trader's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderConfig {
    pub name: String,
    pub agent_id: i64,
    pub base_funding: f64,
    pub quote_funding: f64,
    #[serde(default = "default_decimals")]
    pub base_decimals: u32,
    #[serde(default = "default_decimals")]
    pub quote_decimals: u32,
    #[serde(default)]
    pub subscribe_trades: bool,
}

/// Descriptor of one compute block's simulation, consumed by the factories.
///
/// This is the already-parsed form; reading it from whatever configuration
/// carrier hosts it (XML in the original deployment) happens outside the
/// kernel. Malformed descriptors are fatal at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Books hosted by this block.
    #[serde(default = "default_book_count")]
    pub book_count: u32,
    /// Width of each block in the global book-id space.
    #[serde(default = "default_block_dim")]
    pub block_dim: u32,
    #[serde(default)]
    pub fee_policy: Option<FeePolicyConfig>,
    #[serde(default = "default_maintenance_margin")]
    pub maintenance_margin: f64,
    /// Nanoseconds between a request's delivery and its response's arrival.
    #[serde(default)]
    pub response_delay: u64,
    #[serde(default)]
    pub traders: Vec<TraderConfig>,
}

impl SimulationConfig {
    /// Builds the block's exchange agent: books, fee policy, trader accounts,
    /// trade subscriptions.
    pub fn build_exchange(&self) -> MultibookResult<MultiBookExchangeAgent> {
        if self.book_count == 0 || self.block_dim == 0 {
            return Err(SimulationError::InvalidConfig(
                "bookCount and blockDim must be positive".into(),
            )
            .into());
        }
        if self.book_count > self.block_dim {
            return Err(SimulationError::InvalidConfig(format!(
                "bookCount ({}) exceeds blockDim ({})",
                self.book_count, self.block_dim
            ))
            .into());
        }

        let fee_policy =
            fee_policy_from_config(self.fee_policy.as_ref()).map_err(MultibookError::from)?;
        let maintenance_margin = decimal_field(self.maintenance_margin, "maintenanceMargin")?;

        let mut exchange = MultiBookExchangeAgent::new(self.book_count as usize, fee_policy)
            .with_maintenance_margin(maintenance_margin)
            .with_response_delay(Timespan(self.response_delay));

        for trader in &self.traders {
            let balances = Balances::new(
                Balance::new(
                    decimal_field(trader.base_funding, "baseFunding")?,
                    None,
                    trader.base_decimals,
                )?,
                Balance::new(
                    decimal_field(trader.quote_funding, "quoteFunding")?,
                    None,
                    trader.quote_decimals,
                )?,
                trader.base_decimals,
                trader.quote_decimals,
            )?;
            exchange.register_trader(trader.name.clone(), AgentId(trader.agent_id), balances);
            if trader.subscribe_trades {
                exchange.subscribe_trades(trader.name.clone());
            }
        }
        Ok(exchange)
    }
}

fn decimal_field(value: f64, field: &str) -> MultibookResult<Decimal> {
    f64_to_decimal(value, crate::decimal::DEFAULT_DECIMAL_PLACES).map_err(|_| {
        MultibookError::from(SimulationError::InvalidConfig(format!(
            "{field} is not a finite number"
        )))
    })
}
