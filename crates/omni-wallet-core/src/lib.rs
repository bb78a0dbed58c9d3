pub mod wallet_core;

pub use wallet_core::{
    address_from_public_key, validate_address, WalletError, WalletIdentity, WalletKeys,
    ADDRESS_BYTES,
};
