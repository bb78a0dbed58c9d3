/// OMNI ECONOMICS
///
/// Fee pricing for every transaction type admitted to the ledger.

pub mod fee_market;

pub use fee_market::{FeeMarketError, FeeSchedule, TransactionType, BPS_DENOMINATOR, DEFAULT_BASE_FEE};
