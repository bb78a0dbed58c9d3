/// FEE SCHEDULE
///
/// Fees are a deterministic function of the transaction type: a per-type
/// multiplier (in basis points) applied to a configurable base fee. There is
/// no congestion component and no randomness, so every node computing the fee
/// for the same transaction gets the same number.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Basis-point denominator (10_000 bps = 1.0x)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default base fee in minor units
pub const DEFAULT_BASE_FEE: u128 = 1;

/// Transaction type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum TransactionType {
    /// Fungible currency payment
    Payment,
    /// Booking payment (fungible, priced above a plain payment)
    Reservation,
    /// NFT creation event
    NftMint,
    /// NFT ownership change
    NftTransfer,
    /// Loyalty token reward from a merchant
    LoyaltyReward,
    /// Governance proposal or vote record
    GovernanceRecord,
    /// Supply creation; engine-only, never fee-bearing
    Issuance,
}

impl TransactionType {
    pub const ALL: [TransactionType; 7] = [
        TransactionType::Payment,
        TransactionType::Reservation,
        TransactionType::NftMint,
        TransactionType::NftTransfer,
        TransactionType::LoyaltyReward,
        TransactionType::GovernanceRecord,
        TransactionType::Issuance,
    ];

    /// Whether this type moves an NFT rather than a fungible amount
    pub fn is_nft(&self) -> bool {
        matches!(self, TransactionType::NftMint | TransactionType::NftTransfer)
    }

    /// Whether a nonzero fungible amount is required
    pub fn requires_amount(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment
                | TransactionType::Reservation
                | TransactionType::LoyaltyReward
                | TransactionType::Issuance
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Reservation => "reservation",
            Self::NftMint => "nft_mint",
            Self::NftTransfer => "nft_transfer",
            Self::LoyaltyReward => "loyalty_reward",
            Self::GovernanceRecord => "governance_record",
            Self::Issuance => "issuance",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = FeeMarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FeeMarketError::UnknownTransactionType(s.to_string()))
    }
}

/// Fee table: base fee times a per-type multiplier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Base fee in minor units of the fee asset
    pub base_fee: u128,
    /// Multiplier per type, in basis points
    pub multipliers_bps: BTreeMap<TransactionType, u128>,
}

impl FeeSchedule {
    /// Standard multipliers over the given base fee
    pub fn new(base_fee: u128) -> Self {
        let mut multipliers_bps = BTreeMap::new();
        multipliers_bps.insert(TransactionType::Payment, 10_000); // 1.0x
        multipliers_bps.insert(TransactionType::Reservation, 12_000); // 1.2x
        multipliers_bps.insert(TransactionType::NftMint, 20_000); // 2.0x
        multipliers_bps.insert(TransactionType::NftTransfer, 15_000); // 1.5x
        multipliers_bps.insert(TransactionType::LoyaltyReward, 5_000); // 0.5x
        multipliers_bps.insert(TransactionType::GovernanceRecord, 8_000); // 0.8x
        multipliers_bps.insert(TransactionType::Issuance, 0);

        FeeSchedule {
            base_fee,
            multipliers_bps,
        }
    }

    /// Fee for a transaction of the given type, rounded down
    pub fn fee_for(&self, tx_type: TransactionType) -> Result<u128, FeeMarketError> {
        let bps = self
            .multipliers_bps
            .get(&tx_type)
            .ok_or_else(|| FeeMarketError::UnknownTransactionType(tx_type.to_string()))?;

        self.base_fee
            .checked_mul(*bps)
            .map(|scaled| scaled / BPS_DENOMINATOR)
            .ok_or(FeeMarketError::FeeOverflow)
    }

    pub fn validate(&self) -> Result<(), FeeMarketError> {
        for tx_type in TransactionType::ALL {
            if !self.multipliers_bps.contains_key(&tx_type) {
                return Err(FeeMarketError::UnknownTransactionType(tx_type.to_string()));
            }
        }
        if self.multipliers_bps.get(&TransactionType::Issuance).copied() != Some(0) {
            return Err(FeeMarketError::InvalidMultiplier(
                "issuance must not carry a fee".to_string(),
            ));
        }
        // Every multiplier must be computable at the configured base fee
        for tx_type in TransactionType::ALL {
            self.fee_for(tx_type)?;
        }
        Ok(())
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_FEE)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeeMarketError {
    #[error("Unknown transaction type: {0}")]
    UnknownTransactionType(String),
    #[error("Invalid fee multiplier: {0}")]
    InvalidMultiplier(String),
    #[error("Fee computation overflowed")]
    FeeOverflow,
}
