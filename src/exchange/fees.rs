use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    decimal::{DEFAULT_DECIMAL_PLACES, f64_to_decimal},
    error::PolicyError,
    event::Trade,
    types::{AgentId, BookId},
};

/// Fees charged on one trade, split by liquidity role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fees {
    pub maker: Decimal,
    pub taker: Decimal,
}

/// Everything a fee policy may condition on.
#[derive(Debug, Clone, Copy)]
pub struct TradeDesc<'a> {
    pub book_id: BookId,
    pub resting_agent_id: AgentId,
    pub aggressing_agent_id: AgentId,
    pub trade: &'a Trade,
}

/// Validates a fee rate: `0 <= rate < 1`.
pub fn check_fee_rate(rate: Decimal) -> Result<Decimal, PolicyError> {
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(PolicyError::InvalidFeeRate(rate));
    }
    Ok(rate)
}

/// A fee schedule applied to every trade on a block.
pub trait FeePolicy {
    fn calculate_fees(&self, trade_desc: &TradeDesc<'_>) -> Fees;

    /// The nominal (maker, taker) rates.
    fn rates(&self) -> Fees;
}

/// Charges nothing, ever.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroFeePolicy;

impl FeePolicy for ZeroFeePolicy {
    fn calculate_fees(&self, _trade_desc: &TradeDesc<'_>) -> Fees {
        Fees::default()
    }

    fn rates(&self) -> Fees {
        Fees::default()
    }
}

/// Constant maker/taker rates, symmetric across trade directions:
/// `fee = rate * volume * price` on both sides.
#[derive(Debug, Clone, Copy)]
pub struct StaticFeePolicy {
    maker_fee_rate: Decimal,
    taker_fee_rate: Decimal,
}

impl StaticFeePolicy {
    pub fn new(maker_fee_rate: Decimal, taker_fee_rate: Decimal) -> Result<Self, PolicyError> {
        Ok(Self {
            maker_fee_rate: check_fee_rate(maker_fee_rate)?,
            taker_fee_rate: check_fee_rate(taker_fee_rate)?,
        })
    }
}

impl FeePolicy for StaticFeePolicy {
    fn calculate_fees(&self, trade_desc: &TradeDesc<'_>) -> Fees {
        let trade = trade_desc.trade;
        let notional = trade.volume * trade.price;
        Fees {
            maker: self.maker_fee_rate * notional,
            taker: self.taker_fee_rate * notional,
        }
    }

    fn rates(&self) -> Fees {
        Fees {
            maker: self.maker_fee_rate,
            taker: self.taker_fee_rate,
        }
    }
}

/// Static rates, except that any side whose agent id falls inside the closed
/// VIP range pays nothing.
#[derive(Debug, Clone, Copy)]
pub struct VipFeePolicy {
    maker_fee_rate: Decimal,
    taker_fee_rate: Decimal,
    vip_agent_id_range: (AgentId, AgentId),
}

impl VipFeePolicy {
    pub fn new(
        maker_fee_rate: Decimal,
        taker_fee_rate: Decimal,
        vip_agent_id_range: (AgentId, AgentId),
    ) -> Result<Self, PolicyError> {
        let (lo, hi) = vip_agent_id_range;
        if lo >= hi {
            return Err(PolicyError::InvalidVipRange { lo, hi });
        }
        Ok(Self {
            maker_fee_rate: check_fee_rate(maker_fee_rate)?,
            taker_fee_rate: check_fee_rate(taker_fee_rate)?,
            vip_agent_id_range,
        })
    }

    fn is_vip(&self, agent_id: AgentId) -> bool {
        let (lo, hi) = self.vip_agent_id_range;
        lo <= agent_id && agent_id <= hi
    }
}

impl FeePolicy for VipFeePolicy {
    fn calculate_fees(&self, trade_desc: &TradeDesc<'_>) -> Fees {
        let trade = trade_desc.trade;
        let notional = trade.volume * trade.price;
        Fees {
            maker: if self.is_vip(trade_desc.resting_agent_id) {
                Decimal::ZERO
            } else {
                self.maker_fee_rate * notional
            },
            taker: if self.is_vip(trade_desc.aggressing_agent_id) {
                Decimal::ZERO
            } else {
                self.taker_fee_rate * notional
            },
        }
    }

    fn rates(&self) -> Fees {
        Fees {
            maker: self.maker_fee_rate,
            taker: self.taker_fee_rate,
        }
    }
}

/// Fee-policy descriptor as it appears in configuration. Unknown types fall
/// back to the zero policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeePolicyConfig {
    Static {
        #[serde(rename = "makerFee")]
        maker_fee: f64,
        #[serde(rename = "takerFee")]
        taker_fee: f64,
    },
    Vip {
        #[serde(rename = "makerFee")]
        maker_fee: f64,
        #[serde(rename = "takerFee")]
        taker_fee: f64,
        #[serde(rename = "agentIdLowerBound")]
        agent_id_lower_bound: i64,
        #[serde(rename = "agentIdUpperBound")]
        agent_id_upper_bound: i64,
    },
    #[serde(other)]
    Zero,
}

/// Builds the configured policy. `None` (no policy node) means zero fees.
pub fn fee_policy_from_config(
    config: Option<&FeePolicyConfig>,
) -> Result<Box<dyn FeePolicy + Send>, PolicyError> {
    let rate = |value: f64| -> Result<Decimal, PolicyError> {
        check_fee_rate(
            f64_to_decimal(value, DEFAULT_DECIMAL_PLACES)
                .map_err(|_| PolicyError::InvalidFeeRate(Decimal::ZERO))?,
        )
    };

    match config {
        Some(FeePolicyConfig::Static {
            maker_fee,
            taker_fee,
        }) => Ok(Box::new(StaticFeePolicy::new(
            rate(*maker_fee)?,
            rate(*taker_fee)?,
        )?)),
        Some(FeePolicyConfig::Vip {
            maker_fee,
            taker_fee,
            agent_id_lower_bound,
            agent_id_upper_bound,
        }) => Ok(Box::new(VipFeePolicy::new(
            rate(*maker_fee)?,
            rate(*taker_fee)?,
            (AgentId(*agent_id_lower_bound), AgentId(*agent_id_upper_bound)),
        )?)),
        Some(FeePolicyConfig::Zero) | None => Ok(Box::new(ZeroFeePolicy)),
    }
}
