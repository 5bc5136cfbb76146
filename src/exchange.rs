pub mod fees;
pub mod multibook;

pub use fees::{
    FeePolicy, FeePolicyConfig, Fees, StaticFeePolicy, TradeDesc, VipFeePolicy, ZeroFeePolicy,
    check_fee_rate, fee_policy_from_config,
};
pub use multibook::MultiBookExchangeAgent;
