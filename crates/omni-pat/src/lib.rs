//! OMNI Programmable Asset Tokens
//!
//! Payments, NFT minting and transfer, and loyalty rewards, all expressed as
//! transactions handed to a `TransactionSubmitter`.

pub mod asset_ops;
pub mod asset_token;

pub use asset_ops::{new_nft_id, new_tx_id, AssetOps, MintReceipt};
pub use asset_token::{RarityError, RarityTable};
