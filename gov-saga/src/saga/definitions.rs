//! Governance saga definitions.
//!
//! Each governance action declares, as data, the steps the shared engine
//! executes: the off-chain record to create, the optional ledger call with
//! the event kind its confirmation must carry, and the side artifacts to
//! upload. The ledger call is only planned when ledger configuration is
//! present; without it a saga completes off-chain only.

use serde::{Deserialize, Serialize};
use serde_json::json;

use gov_core::types::common::derive_slug;
use gov_core::types::event::EventKind;
use gov_core::types::record::{NewRecord, RecordKind};

use crate::config::OrchestratorConfig;
use crate::error::{SagaError, SagaResult};
use crate::gateway::{LedgerCall, UploadFile};

use super::{CREATE_OFFCHAIN, LINK_RECORDS, SUBMIT_ONCHAIN, UPLOAD_FILES};

/// How accounts join a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EntryMethod {
    /// Anyone may join
    Open,
    /// Joining requires holding a token balance
    TokenGated {
        token_address: String,
        min_balance: u64,
    },
    /// Joining requires being allowlisted
    Allowlist { members: Vec<String> },
}

/// How proposals are decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    /// One token, one vote
    TokenWeighted,
    /// One member, one vote
    MemberOneVote,
}

/// Create a governance space
#[derive(Debug, Clone)]
pub struct CreateSpace {
    pub title: String,
    pub description: String,
    pub creator: String,
    pub entry_method: EntryMethod,
    pub voting_method: VotingMethod,
    /// Caller-supplied business key; derived from the title when absent
    pub slug: Option<String>,
    /// Space images to upload
    pub images: Vec<UploadFile>,
}

/// Add a member to a space
#[derive(Debug, Clone)]
pub struct AddMember {
    pub space_slug: String,
    /// On-chain space id, required when the ledger half is enabled
    pub space_ledger_id: Option<u64>,
    pub member: String,
    pub creator: String,
    pub slug: Option<String>,
}

/// Change how accounts join a space
#[derive(Debug, Clone)]
pub struct ChangeEntryMethod {
    pub space_slug: String,
    pub entry_method: EntryMethod,
    pub creator: String,
    pub slug: Option<String>,
}

/// Change how proposals are decided
#[derive(Debug, Clone)]
pub struct ChangeVotingMethod {
    pub space_slug: String,
    pub voting_method: VotingMethod,
    pub creator: String,
    pub slug: Option<String>,
}

/// Issue a governance token for a space
#[derive(Debug, Clone)]
pub struct IssueToken {
    pub space_slug: String,
    pub name: String,
    pub symbol: String,
    pub initial_supply: u64,
    pub creator: String,
    pub slug: Option<String>,
    /// Token image to upload
    pub image: Option<UploadFile>,
}

/// Mint token supply to a space treasury
#[derive(Debug, Clone)]
pub struct MintToTreasury {
    pub token_slug: String,
    pub amount: u64,
    pub creator: String,
    pub slug: Option<String>,
}

/// One of the six governance actions
#[derive(Debug, Clone)]
pub enum GovernanceAction {
    CreateSpace(CreateSpace),
    AddMember(AddMember),
    ChangeEntryMethod(ChangeEntryMethod),
    ChangeVotingMethod(ChangeVotingMethod),
    IssueToken(IssueToken),
    MintToTreasury(MintToTreasury),
}

/// Declarative plan the engine executes
#[derive(Debug, Clone)]
pub struct SagaPlan {
    /// Action name for logs and reports
    pub action: &'static str,
    /// Off-chain record to create first
    pub record: NewRecord,
    /// Ledger call plus the event kind its confirmation must carry
    pub ledger_call: Option<(LedgerCall, EventKind)>,
    /// Side artifacts to upload
    pub uploads: Vec<UploadFile>,
    /// Extra fields merged into the record at link time
    pub link_fields: Option<serde_json::Value>,
}

impl SagaPlan {
    /// Names of the steps this plan will run, in order
    pub fn step_names(&self) -> Vec<&'static str> {
        let mut names = vec![CREATE_OFFCHAIN];
        if self.ledger_call.is_some() {
            names.push(SUBMIT_ONCHAIN);
        }
        if !self.uploads.is_empty() {
            names.push(UPLOAD_FILES);
        }
        names.push(LINK_RECORDS);
        names
    }
}

impl GovernanceAction {
    /// Action name for logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSpace(_) => "create_space",
            Self::AddMember(_) => "add_member",
            Self::ChangeEntryMethod(_) => "change_entry_method",
            Self::ChangeVotingMethod(_) => "change_voting_method",
            Self::IssueToken(_) => "issue_token",
            Self::MintToTreasury(_) => "mint_to_treasury",
        }
    }

    /// Validate the input and build the declarative plan.
    ///
    /// Rejects with a validation error before any side effect.
    pub fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        match self {
            Self::CreateSpace(input) => input.plan(config),
            Self::AddMember(input) => input.plan(config),
            Self::ChangeEntryMethod(input) => input.plan(config),
            Self::ChangeVotingMethod(input) => input.plan(config),
            Self::IssueToken(input) => input.plan(config),
            Self::MintToTreasury(input) => input.plan(config),
        }
    }
}

fn require(condition: bool, message: &str) -> SagaResult<()> {
    if condition {
        Ok(())
    } else {
        Err(SagaError::Validation(message.to_string()))
    }
}

fn require_address(value: &str, what: &str) -> SagaResult<()> {
    require(
        value.starts_with("0x") && value.len() > 2,
        &format!("{} must be a 0x-prefixed address", what),
    )
}

impl CreateSpace {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.title.trim().is_empty(), "title must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;
        if let EntryMethod::TokenGated { token_address, .. } = &self.entry_method {
            require_address(token_address, "gating token")?;
        }

        let slug = self
            .slug
            .clone()
            .unwrap_or_else(|| derive_slug(&self.title, &self.creator));

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                LedgerCall {
                    contract: ledger.governor_address.clone(),
                    function: "createSpace".to_string(),
                    args: vec![json!({
                        "title": self.title,
                        "slug": slug,
                        "entry_method": self.entry_method,
                        "voting_method": self.voting_method,
                    })],
                },
                EventKind::SpaceCreated,
            )
        });

        Ok(SagaPlan {
            action: "create_space",
            record: NewRecord {
                kind: RecordKind::Space,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "title": self.title,
                    "description": self.description,
                    "entry_method": self.entry_method,
                    "voting_method": self.voting_method,
                }),
            },
            ledger_call,
            uploads: self.images.clone(),
            link_fields: None,
        })
    }
}

impl AddMember {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.space_slug.trim().is_empty(), "space slug must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;
        require_address(&self.member, "member")?;
        if config.ledger_enabled() {
            require(
                self.space_ledger_id.is_some(),
                "space ledger id is required to join on-chain",
            )?;
        }

        let slug = self.slug.clone().unwrap_or_else(|| {
            derive_slug(&format!("member {} {}", self.space_slug, self.member), &self.creator)
        });

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                LedgerCall {
                    contract: ledger.governor_address.clone(),
                    function: "joinSpace".to_string(),
                    args: vec![json!({
                        "space_id": self.space_ledger_id,
                        "member": self.member,
                    })],
                },
                EventKind::MemberJoined,
            )
        });

        Ok(SagaPlan {
            action: "add_member",
            record: NewRecord {
                kind: RecordKind::Member,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "space_slug": self.space_slug,
                    "member": self.member,
                }),
            },
            ledger_call,
            uploads: Vec::new(),
            link_fields: None,
        })
    }
}

impl ChangeEntryMethod {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.space_slug.trim().is_empty(), "space slug must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;
        if let EntryMethod::TokenGated { token_address, .. } = &self.entry_method {
            require_address(token_address, "gating token")?;
        }

        let slug = self.slug.clone().unwrap_or_else(|| {
            derive_slug(&format!("entry method {}", self.space_slug), &self.creator)
        });

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                governance_proposal_call(
                    ledger,
                    json!({
                        "action": "set_entry_method",
                        "space_slug": self.space_slug,
                        "entry_method": self.entry_method,
                    }),
                ),
                EventKind::ProposalCreated,
            )
        });

        Ok(SagaPlan {
            action: "change_entry_method",
            record: NewRecord {
                kind: RecordKind::Proposal,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "action": "set_entry_method",
                    "space_slug": self.space_slug,
                    "entry_method": self.entry_method,
                }),
            },
            ledger_call,
            uploads: Vec::new(),
            link_fields: None,
        })
    }
}

impl ChangeVotingMethod {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.space_slug.trim().is_empty(), "space slug must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;

        let slug = self.slug.clone().unwrap_or_else(|| {
            derive_slug(&format!("voting method {}", self.space_slug), &self.creator)
        });

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                governance_proposal_call(
                    ledger,
                    json!({
                        "action": "set_voting_method",
                        "space_slug": self.space_slug,
                        "voting_method": self.voting_method,
                    }),
                ),
                EventKind::ProposalCreated,
            )
        });

        Ok(SagaPlan {
            action: "change_voting_method",
            record: NewRecord {
                kind: RecordKind::Proposal,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "action": "set_voting_method",
                    "space_slug": self.space_slug,
                    "voting_method": self.voting_method,
                }),
            },
            ledger_call,
            uploads: Vec::new(),
            link_fields: None,
        })
    }
}

impl IssueToken {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.space_slug.trim().is_empty(), "space slug must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;
        require(!self.name.trim().is_empty(), "token name must not be empty")?;
        require(
            !self.symbol.trim().is_empty() && self.symbol.len() <= 8,
            "token symbol must be 1-8 characters",
        )?;
        require(self.initial_supply > 0, "initial supply must be positive")?;

        let slug = self
            .slug
            .clone()
            .unwrap_or_else(|| derive_slug(&format!("token {}", self.name), &self.creator));

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                governance_proposal_call(
                    ledger,
                    json!({
                        "action": "deploy_token",
                        "space_slug": self.space_slug,
                        "factory": ledger.token_factory_address,
                        "name": self.name,
                        "symbol": self.symbol,
                        "initial_supply": self.initial_supply,
                    }),
                ),
                EventKind::ProposalCreated,
            )
        });

        Ok(SagaPlan {
            action: "issue_token",
            record: NewRecord {
                kind: RecordKind::Token,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "space_slug": self.space_slug,
                    "name": self.name,
                    "symbol": self.symbol,
                    "initial_supply": self.initial_supply,
                }),
            },
            ledger_call,
            uploads: self.image.clone().into_iter().collect(),
            link_fields: None,
        })
    }
}

impl MintToTreasury {
    fn plan(&self, config: &OrchestratorConfig) -> SagaResult<SagaPlan> {
        require(!self.token_slug.trim().is_empty(), "token slug must not be empty")?;
        require(!self.creator.trim().is_empty(), "creator must not be empty")?;
        require(self.amount > 0, "mint amount must be positive")?;

        let slug = self.slug.clone().unwrap_or_else(|| {
            derive_slug(&format!("mint {}", self.token_slug), &self.creator)
        });

        let ledger_call = config.ledger.as_ref().map(|ledger| {
            (
                governance_proposal_call(
                    ledger,
                    json!({
                        "action": "mint_treasury",
                        "token_slug": self.token_slug,
                        "amount": self.amount,
                    }),
                ),
                EventKind::ProposalCreated,
            )
        });

        Ok(SagaPlan {
            action: "mint_to_treasury",
            record: NewRecord {
                kind: RecordKind::Proposal,
                slug,
                creator: self.creator.clone(),
                fields: json!({
                    "action": "mint_treasury",
                    "token_slug": self.token_slug,
                    "amount": self.amount,
                }),
            },
            ledger_call,
            uploads: Vec::new(),
            link_fields: None,
        })
    }
}

fn governance_proposal_call(
    ledger: &crate::config::LedgerConfig,
    payload: serde_json::Value,
) -> LedgerCall {
    LedgerCall {
        contract: ledger.governor_address.clone(),
        function: "createProposal".to_string(),
        args: vec![payload],
    }
}
