// Governance recording - proposals and votes written to the chain
//
// SAFETY INVARIANTS:
// 1. Records are ordinary GovernanceRecord transactions: zero amount, fee paid
// 2. Voting power is the voter's governance-asset balance at submission time
// 3. Nothing is tallied; quorum and outcome are left to readers of the chain

use log::info;
use omni_core::{
    AdmissionError, Address, Transaction, TransactionSubmitter, TransactionType, TxId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Metadata keys carried by governance transactions
pub const META_RECORD: &str = "record";
pub const META_PROPOSAL_ID: &str = "proposal_id";
pub const META_TITLE: &str = "title";
pub const META_DESCRIPTION: &str = "description";
pub const META_VOTE: &str = "vote";
pub const META_VOTING_POWER: &str = "voting_power";

const RECORD_PROPOSAL: &str = "proposal";
const RECORD_VOTE: &str = "vote";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("Proposal title is empty")]
    EmptyTitle,

    #[error("Proposal id is empty")]
    EmptyProposalId,

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

impl VoteChoice {
    pub fn name(&self) -> &'static str {
        match self {
            VoteChoice::Yes => "yes",
            VoteChoice::No => "no",
            VoteChoice::Abstain => "abstain",
        }
    }
}

impl FromStr for VoteChoice {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "approve" => Ok(VoteChoice::Yes),
            "no" | "reject" => Ok(VoteChoice::No),
            "abstain" => Ok(VoteChoice::Abstain),
            other => Err(GovernanceError::InvalidVote(other.to_string())),
        }
    }
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where governance records are sent and which asset weighs votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub registry_address: Address,
    pub governance_asset: String,
    /// Asset named on the record transaction; only the fee moves
    pub record_asset: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            registry_address: "omni-governance".to_string(),
            governance_asset: "GOV".to_string(),
            record_asset: "OMNI".to_string(),
        }
    }
}

/// Decoded view of a governance transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceRecord {
    Proposal {
        proposal_id: String,
        proposer: Address,
        title: String,
        description: String,
    },
    Vote {
        proposal_id: String,
        voter: Address,
        choice: VoteChoice,
        voting_power: u128,
    },
}

impl GovernanceRecord {
    /// Decode a `GovernanceRecord` transaction; `None` for anything else
    pub fn from_transaction(tx: &Transaction) -> Option<Self> {
        if tx.kind != TransactionType::GovernanceRecord {
            return None;
        }
        let proposal_id = tx.metadata.get(META_PROPOSAL_ID)?.clone();
        match tx.metadata.get(META_RECORD)?.as_str() {
            RECORD_PROPOSAL => Some(GovernanceRecord::Proposal {
                proposal_id,
                proposer: tx.from.clone(),
                title: tx.metadata.get(META_TITLE)?.clone(),
                description: tx.metadata.get(META_DESCRIPTION).cloned().unwrap_or_default(),
            }),
            RECORD_VOTE => Some(GovernanceRecord::Vote {
                proposal_id,
                voter: tx.from.clone(),
                choice: tx.metadata.get(META_VOTE)?.parse().ok()?,
                voting_power: tx.metadata.get(META_VOTING_POWER)?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Proposal accepted into the mempool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReceipt {
    pub proposal_id: String,
    pub tx_id: TxId,
}

pub struct GovernanceStub<'a, S: TransactionSubmitter + ?Sized> {
    submitter: &'a S,
    config: GovernanceConfig,
}

impl<'a, S: TransactionSubmitter + ?Sized> GovernanceStub<'a, S> {
    pub fn new(submitter: &'a S, config: GovernanceConfig) -> Self {
        Self { submitter, config }
    }

    pub fn record_proposal(
        &self,
        proposer: &str,
        title: &str,
        description: &str,
    ) -> Result<ProposalReceipt, GovernanceError> {
        if title.trim().is_empty() {
            return Err(GovernanceError::EmptyTitle);
        }

        let proposal_id = Uuid::new_v4().to_string();
        let mut metadata = BTreeMap::new();
        metadata.insert(META_RECORD.to_string(), RECORD_PROPOSAL.to_string());
        metadata.insert(META_PROPOSAL_ID.to_string(), proposal_id.clone());
        metadata.insert(META_TITLE.to_string(), title.to_string());
        metadata.insert(META_DESCRIPTION.to_string(), description.to_string());

        let tx_id = self.submit(proposer, metadata)?;
        info!("Proposal {} '{}' recorded by {}", proposal_id, title, proposer);
        Ok(ProposalReceipt { proposal_id, tx_id })
    }

    /// Record a vote weighted by the voter's current governance balance
    pub fn record_vote(
        &self,
        voter: &str,
        proposal_id: &str,
        choice: VoteChoice,
    ) -> Result<TxId, GovernanceError> {
        if proposal_id.trim().is_empty() {
            return Err(GovernanceError::EmptyProposalId);
        }

        let voting_power = self
            .submitter
            .balance_of(voter, &self.config.governance_asset);
        let mut metadata = BTreeMap::new();
        metadata.insert(META_RECORD.to_string(), RECORD_VOTE.to_string());
        metadata.insert(META_PROPOSAL_ID.to_string(), proposal_id.to_string());
        metadata.insert(META_VOTE.to_string(), choice.name().to_string());
        metadata.insert(META_VOTING_POWER.to_string(), voting_power.to_string());

        let tx_id = self.submit(voter, metadata)?;
        info!(
            "Vote {} on {} by {} (power {})",
            choice, proposal_id, voter, voting_power
        );
        Ok(tx_id)
    }

    fn submit(&self, from: &str, metadata: BTreeMap<String, String>) -> Result<TxId, GovernanceError> {
        let tx = Transaction::new(
            Uuid::new_v4().to_string(),
            from,
            &self.config.registry_address,
            0,
            &self.config.record_asset,
            TransactionType::GovernanceRecord,
            metadata,
            self.submitter.now_millis(),
        );
        Ok(self.submitter.submit(tx)?)
    }
}
