use std::collections::HashMap;
use std::fmt;

use pure_core::{BlockHeader, Hash, PublicKey, ScriptHash, Sig, Transaction};

use crate::block_builder::HeaderTemplate;
use crate::error::ConsensusError;
use crate::net::{ConsensusMessage, ConsensusPayload};
use crate::quorum::quorum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
}

/// Role and phase of the current round.
///
/// `role` is `None` while the node is not in the roster. The phase flags
/// may combine freely, e.g. a primary with `request_sent` and `block_sent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundState {
    pub role: Option<Role>,
    pub request_sent: bool,
    pub request_received: bool,
    pub signature_sent: bool,
    pub view_changing: bool,
    pub block_sent: bool,
}

impl RoundState {
    pub fn is_primary(&self) -> bool {
        self.role == Some(Role::Primary)
    }

    pub fn is_backup(&self) -> bool {
        self.role == Some(Role::Backup)
    }

    fn clear_phase(&mut self) {
        *self = RoundState {
            role: self.role,
            ..RoundState::default()
        };
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        match self.role {
            Some(Role::Primary) => parts.push("Primary"),
            Some(Role::Backup) => parts.push("Backup"),
            None => parts.push("Initial"),
        }
        for (set, name) in [
            (self.request_sent, "RequestSent"),
            (self.request_received, "RequestReceived"),
            (self.signature_sent, "SignatureSent"),
            (self.view_changing, "ViewChanging"),
            (self.block_sent, "BlockSent"),
        ] {
            if set {
                parts.push(name);
            }
        }
        f.write_str(&parts.join("|"))
    }
}

/// Everything one node knows about the round in progress.
///
/// Owned by the consensus service and mutated only from its handlers.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub version: u32,
    pub block_index: u64,
    pub view_number: u8,
    pub prev_hash: Hash,
    pub validators: Vec<PublicKey>,
    pub my_index: Option<usize>,
    pub primary_index: usize,
    pub next_consensus: ScriptHash,
    /// Proposal order, reward transaction first
    pub transaction_hashes: Vec<Hash>,
    pub transactions: HashMap<Hash, Transaction>,
    /// One slot per roster index
    pub signatures: Vec<Option<Sig>>,
    /// Latest view each validator voted for; only ever increases
    pub expected_view: Vec<u8>,
    pub state: RoundState,
    pub nonce: u64,
    pub timestamp: u64,
}

impl RoundContext {
    pub fn new(version: u32) -> Self {
        RoundContext {
            version,
            block_index: 0,
            view_number: 0,
            prev_hash: Hash::ZERO,
            validators: Vec::new(),
            my_index: None,
            primary_index: 0,
            next_consensus: ScriptHash::ZERO,
            transaction_hashes: Vec::new(),
            transactions: HashMap::new(),
            signatures: Vec::new(),
            expected_view: Vec::new(),
            state: RoundState::default(),
            nonce: 0,
            timestamp: 0,
        }
    }

    /// Start view 0 of `block_index` on top of `prev_hash`
    pub fn reset(
        &mut self,
        block_index: u64,
        prev_hash: Hash,
        validators: Vec<PublicKey>,
        my_index: Option<usize>,
    ) {
        let n = validators.len();
        self.block_index = block_index;
        self.prev_hash = prev_hash;
        self.validators = validators;
        self.my_index = my_index.filter(|i| *i < n);
        self.view_number = 0;
        self.expected_view = vec![0; n];
        self.state = RoundState::default();
        self.begin_view();
    }

    /// Move to `view_number` within the same height.
    ///
    /// Votes in `expected_view` are kept; only this node's own entry is
    /// raised to the new view.
    pub fn change_view(&mut self, view_number: u8) {
        self.view_number = view_number;
        if let Some(slot) = self.my_index.and_then(|i| self.expected_view.get_mut(i)) {
            *slot = (*slot).max(view_number);
        }
        self.state.clear_phase();
        self.begin_view();
    }

    fn begin_view(&mut self) {
        self.primary_index = self.primary_index_for(self.view_number);
        self.state.role = self.my_index.map(|me| {
            if me == self.primary_index {
                Role::Primary
            } else {
                Role::Backup
            }
        });
        self.transaction_hashes.clear();
        self.transactions.clear();
        self.signatures = vec![None; self.validators.len()];
        self.nonce = 0;
        self.timestamp = 0;
    }

    /// Primary for `view_number`: low eight bytes of the previous hash plus
    /// the view, modulo the roster size
    pub fn primary_index_for(&self, view_number: u8) -> usize {
        let n = self.validators.len() as u64;
        if n == 0 {
            return 0;
        }
        let base = self.prev_hash.low_u64() % n;
        ((base + u64::from(view_number)) % n) as usize
    }

    pub fn m(&self) -> usize {
        quorum(self.validators.len())
    }

    pub fn is_primary(&self) -> bool {
        self.state.is_primary()
    }

    pub fn is_backup(&self) -> bool {
        self.state.is_backup()
    }

    pub fn my_key(&self) -> Option<&PublicKey> {
        self.my_index.and_then(|i| self.validators.get(i))
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.is_some()).count()
    }

    /// Votes currently cast for `view_number`
    pub fn view_votes(&self, view_number: u8) -> usize {
        self.expected_view.iter().filter(|v| **v == view_number).count()
    }

    pub fn has_all_transactions(&self) -> bool {
        !self.transaction_hashes.is_empty()
            && self
                .transaction_hashes
                .iter()
                .all(|hash| self.transactions.contains_key(hash))
    }

    /// Collected transactions in proposal order, skipping any still missing
    pub fn ordered_transactions(&self) -> Vec<&Transaction> {
        self.transaction_hashes
            .iter()
            .filter_map(|hash| self.transactions.get(hash))
            .collect()
    }

    pub fn missing_hashes(&self) -> Vec<Hash> {
        self.transaction_hashes
            .iter()
            .filter(|hash| !self.transactions.contains_key(hash))
            .copied()
            .collect()
    }

    /// Header this node would sign for the current proposal
    pub fn make_header(&self) -> Option<BlockHeader> {
        if self.transaction_hashes.is_empty() {
            return None;
        }
        let template = HeaderTemplate {
            version: self.version,
            prev_hash: self.prev_hash,
            index: self.block_index,
            timestamp: self.timestamp,
            nonce: self.nonce,
            next_consensus: self.next_consensus,
        };
        Some(template.header(&self.transaction_hashes))
    }

    pub fn make_change_view(&self) -> ConsensusMessage {
        let new_view_number = self
            .my_index
            .and_then(|i| self.expected_view.get(i))
            .copied()
            .unwrap_or(self.view_number);
        ConsensusMessage::ChangeView {
            view_number: self.view_number,
            new_view_number,
        }
    }

    pub fn make_prepare_request(&self) -> Result<ConsensusMessage, ConsensusError> {
        let me = self.my_index.ok_or(ConsensusError::NotValidator)?;
        let miner_transaction = self
            .transaction_hashes
            .first()
            .and_then(|hash| self.transactions.get(hash))
            .cloned()
            .ok_or_else(|| ConsensusError::InvalidBlock("proposal has no reward".to_string()))?;
        let signature = self
            .signatures
            .get(me)
            .copied()
            .flatten()
            .ok_or(ConsensusError::InsufficientSignatures { have: 0, need: 1 })?;

        Ok(ConsensusMessage::PrepareRequest {
            view_number: self.view_number,
            nonce: self.nonce,
            next_consensus: self.next_consensus,
            transaction_hashes: self.transaction_hashes.clone(),
            miner_transaction,
            signature,
        })
    }

    pub fn make_prepare_response(&self, signature: Sig) -> ConsensusMessage {
        ConsensusMessage::PrepareResponse {
            view_number: self.view_number,
            signature,
        }
    }

    /// Unsigned envelope for `message`, sent as this node
    pub fn make_payload(&self, message: &ConsensusMessage) -> Result<ConsensusPayload, ConsensusError> {
        let me = self.my_index.ok_or(ConsensusError::NotValidator)?;
        let validator_index = u16::try_from(me).map_err(|_| ConsensusError::UnknownValidator(me))?;
        Ok(ConsensusPayload {
            version: self.version,
            prev_hash: self.prev_hash,
            block_index: self.block_index,
            validator_index,
            timestamp: self.timestamp,
            data: message.encode()?,
            witness: Sig::default(),
        })
    }
}
