use pure_core::{verify, Block, Sig, Transaction};
use tracing::{debug, info, trace, warn};

use crate::block_builder::{assemble_block, BlockAssembler};
use crate::error::ConsensusError;
use crate::net::{ConsensusMessage, ConsensusPayload, MessageKind};
use crate::ports::Ledger;
use crate::qc::collect_qc;
use crate::quorum::consensus_address;
use crate::service::ConsensusService;

impl<L: Ledger> ConsensusService<L> {
    /// Inbound envelope from a peer.
    ///
    /// Checks run cheapest first: sender, round fields, envelope signature,
    /// decoding, then the view.
    pub fn on_payload(&mut self, payload: ConsensusPayload) -> Result<(), ConsensusError> {
        let Some(me) = self.context.my_index else {
            return Ok(());
        };
        let sender = usize::from(payload.validator_index);
        if sender == me {
            return Ok(());
        }
        let sender_key = *self
            .context
            .validators
            .get(sender)
            .ok_or(ConsensusError::UnknownValidator(sender))?;

        if payload.version != self.context.version
            || payload.prev_hash != self.context.prev_hash
            || payload.block_index != self.context.block_index
        {
            trace!(
                "Ignoring payload for height {} from {}",
                payload.block_index,
                sender
            );
            return Ok(());
        }

        payload
            .verify_witness(&sender_key)
            .map_err(|_| ConsensusError::InvalidSignature(sender))?;
        let message = payload.message()?;

        if message.view_number() != self.context.view_number
            && message.kind() != MessageKind::ChangeView
        {
            trace!(
                "Ignoring {} for view {} from {}",
                message.kind(),
                message.view_number(),
                sender
            );
            return Ok(());
        }

        match message {
            ConsensusMessage::ChangeView {
                new_view_number, ..
            } => {
                self.on_change_view(sender, new_view_number);
                Ok(())
            }
            ConsensusMessage::PrepareRequest { .. } => {
                self.on_prepare_request(sender, payload.timestamp, message)
            }
            ConsensusMessage::PrepareResponse { signature, .. } => {
                self.on_prepare_response(sender, signature)
            }
        }
    }

    fn on_change_view(&mut self, sender: usize, new_view_number: u8) {
        debug!(
            "ChangeView: height={} view={} index={} nv={}",
            self.context.block_index, self.context.view_number, sender, new_view_number
        );
        let Some(vote) = self.context.expected_view.get_mut(sender) else {
            return;
        };
        if new_view_number <= *vote {
            return;
        }
        *vote = new_view_number;
        self.check_expected_view(new_view_number);
    }

    fn on_prepare_request(
        &mut self,
        sender: usize,
        timestamp: u64,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        let ConsensusMessage::PrepareRequest {
            nonce,
            next_consensus,
            transaction_hashes,
            miner_transaction,
            signature,
            ..
        } = message
        else {
            return Ok(());
        };
        debug!(
            "PrepareRequest: height={} view={} index={} tx={}",
            self.context.block_index,
            self.context.view_number,
            sender,
            transaction_hashes.len()
        );

        if !self.context.is_backup() || self.context.state.request_received {
            return Ok(());
        }
        if sender != self.context.primary_index {
            return Ok(());
        }

        let prev_header = self
            .ledger
            .header(&self.context.prev_hash)
            .ok_or(ConsensusError::UnknownHeader(self.context.prev_hash))?;
        let latest = (self.clock.now_millis() / 1000).saturating_add(self.config.max_clock_skew.as_secs());
        if timestamp <= prev_header.timestamp || timestamp > latest {
            warn!("Timestamp incorrect: {}", timestamp);
            return Ok(());
        }

        self.context.state.request_received = true;
        self.context.timestamp = timestamp;
        self.context.nonce = nonce;
        self.context.next_consensus = next_consensus;
        self.context.transaction_hashes = transaction_hashes;
        self.context.transactions.clear();
        if self.context.transaction_hashes.len() > self.config.max_transactions_per_block {
            warn!(
                "Proposal holds {} transactions, limit is {}",
                self.context.transaction_hashes.len(),
                self.config.max_transactions_per_block
            );
            return Ok(());
        }

        let Some(header) = self.context.make_header() else {
            return Ok(());
        };
        let primary_key = self.context.validators[sender];
        if verify(&primary_key, header.hash()?.as_bytes(), &signature).is_err() {
            warn!("Proposal signature does not match header");
            self.request_change_view();
            return Ok(());
        }
        self.context.signatures = vec![None; self.context.validators.len()];
        self.context.signatures[sender] = Some(signature);

        let pending: Vec<_> = self.context.transaction_hashes[1..].to_vec();
        for hash in pending {
            if let Some(tx) = self.pool.get(&hash) {
                if !self.add_transaction(tx, true) {
                    return Ok(());
                }
            }
        }

        if miner_transaction.hash()? != self.context.transaction_hashes[0] {
            warn!("Reward transaction does not match the proposal");
            self.request_change_view();
            return Ok(());
        }
        if !self.add_transaction(miner_transaction, true) {
            return Ok(());
        }

        let missing = self.context.missing_hashes();
        if !missing.is_empty() {
            debug!("Waiting for {} transactions", missing.len());
            self.pool.allow_hashes(&missing);
            self.pool.request_missing(&missing);
        }
        Ok(())
    }

    fn on_prepare_response(&mut self, sender: usize, signature: Sig) -> Result<(), ConsensusError> {
        debug!(
            "PrepareResponse: height={} view={} index={}",
            self.context.block_index, self.context.view_number, sender
        );
        if self.context.state.block_sent {
            return Ok(());
        }
        if self.context.signatures.get(sender).is_some_and(Option::is_some) {
            return Ok(());
        }
        let Some(header) = self.context.make_header() else {
            return Ok(());
        };

        let key = self.context.validators[sender];
        verify(&key, header.hash()?.as_bytes(), &signature)
            .map_err(|_| ConsensusError::InvalidSignature(sender))?;
        self.context.signatures[sender] = Some(signature);
        self.check_signatures();
        Ok(())
    }

    /// A transaction arrived from the network. Returns whether it was taken
    /// for the proposal in progress.
    pub fn on_transaction(&mut self, tx: Transaction) -> bool {
        let state = self.context.state;
        if !state.is_backup()
            || !state.request_received
            || state.signature_sent
            || state.view_changing
        {
            return false;
        }
        let Ok(hash) = tx.hash() else {
            return false;
        };
        if self.context.transactions.contains_key(&hash)
            || !self.context.transaction_hashes.contains(&hash)
        {
            return false;
        }
        self.add_transaction(tx, true)
    }

    /// Take `tx` into the proposal; once the set is complete, check it and
    /// vote. Any rejection turns into a view change request.
    pub(crate) fn add_transaction(&mut self, tx: Transaction, verify: bool) -> bool {
        let hash = match tx.hash() {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Reject transaction: {}", e);
                self.request_change_view();
                return false;
            }
        };

        let accepted = !self.ledger.contains_transaction(&hash)
            && (!verify || {
                let others: Vec<&Transaction> = self.context.transactions.values().collect();
                self.ledger.verify_transaction(&tx, &others)
            })
            && self.policy.check(&tx);
        if !accepted {
            warn!("Reject transaction: {}", hash);
            self.request_change_view();
            return false;
        }
        self.context.transactions.insert(hash, tx);

        if self.context.transactions.len() < self.context.transaction_hashes.len() {
            return true;
        }

        if let Err(e) = self.check_proposal() {
            warn!("Reject proposal: {}", e);
            self.request_change_view();
            return false;
        }

        info!("Send prepare response");
        self.context.state.signature_sent = true;
        match self.sign_header() {
            Ok(signature) => {
                if let Some(me) = self.context.my_index {
                    self.context.signatures[me] = Some(signature);
                }
                let message = self.context.make_prepare_response(signature);
                self.sign_and_relay(&message);
                self.check_signatures();
            }
            Err(e) => warn!("Cannot sign proposal: {}", e),
        }
        true
    }

    /// Checks on a complete transaction set before voting for it
    fn check_proposal(&self) -> Result<(), ConsensusError> {
        let collected = self.context.ordered_transactions();
        let next_consensus = consensus_address(&self.ledger.next_validators(&collected));
        if next_consensus != self.context.next_consensus {
            return Err(ConsensusError::InvalidBlock(
                "next consensus address mismatch".to_string(),
            ));
        }

        let (reward, others) = collected
            .split_first()
            .ok_or_else(|| ConsensusError::InvalidBlock("empty proposal".to_string()))?;
        BlockAssembler::new(&self.config.fee_policy, &self.ledger).verify_reward(reward, others)
    }

    /// Seal and relay the block once a quorum signed a complete proposal
    pub(crate) fn check_signatures(&mut self) {
        if self.context.state.block_sent
            || self.context.signature_count() < self.context.m()
            || !self.context.has_all_transactions()
        {
            return;
        }

        let block = match self.seal_block() {
            Ok(block) => block,
            Err(e) => {
                warn!("Cannot seal block: {}", e);
                return;
            }
        };
        let hash = block.hash().unwrap_or_default();
        info!("Relay block: {}", hash);
        if !self.transport.relay_block(block) {
            warn!("Reject block: {}", hash);
        }
        self.context.state.block_sent = true;
    }

    fn seal_block(&self) -> Result<Block, ConsensusError> {
        let header = self
            .context
            .make_header()
            .ok_or_else(|| ConsensusError::InvalidBlock("no proposal".to_string()))?;
        let qc = collect_qc(&self.context.signatures, self.context.m())?;
        let transactions = self
            .context
            .ordered_transactions()
            .into_iter()
            .cloned()
            .collect();
        assemble_block(header, qc, transactions)
    }
}
