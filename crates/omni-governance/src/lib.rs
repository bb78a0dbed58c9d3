//! OMNI governance stub: proposals and votes recorded on-chain, never tallied.

pub mod governance_voting;

pub use governance_voting::{
    GovernanceConfig, GovernanceError, GovernanceRecord, GovernanceStub, ProposalReceipt,
    VoteChoice,
};
