use std::cmp::Reverse;

use pure_core::{Hash, Transaction};
use tracing::{debug, info, warn};

use crate::block_builder::BlockAssembler;
use crate::error::ConsensusError;
use crate::ports::Ledger;
use crate::quorum::consensus_address;
use crate::service::ConsensusService;
use crate::timer::backoff;

impl<L: Ledger> ConsensusService<L> {
    /// Primary's timeout: build the proposal, sign its header and send it
    pub(crate) fn send_prepare_request(&mut self) -> Result<(), ConsensusError> {
        info!(
            "Send prepare request: height={} view={}",
            self.context.block_index, self.context.view_number
        );
        self.context.state.request_sent = true;

        if !self.context.state.signature_sent {
            if let Err(e) = self.fill_proposal() {
                warn!("Cannot build proposal: {}", e);
                self.request_change_view();
                return Err(e);
            }
            match self.sign_header() {
                Ok(signature) => {
                    if let Some(me) = self.context.my_index {
                        self.context.signatures[me] = Some(signature);
                    }
                }
                Err(e) => debug!("Cannot sign proposal: {}", e),
            }
        }

        match self.context.make_prepare_request() {
            Ok(message) => self.sign_and_relay(&message),
            Err(e) => debug!("Not sending prepare request: {}", e),
        }

        self.arm_timer(backoff(self.config.block_time, self.context.view_number));
        self.check_signatures();
        Ok(())
    }

    fn fill_proposal(&mut self) -> Result<(), ConsensusError> {
        let prev_header = self
            .ledger
            .header(&self.context.prev_hash)
            .ok_or(ConsensusError::UnknownHeader(self.context.prev_hash))?;
        let now = self.clock.now_millis() / 1000;
        self.context.timestamp = now.max(prev_header.timestamp + 1);
        self.context.nonce = rand::random();

        let mut candidates: Vec<_> = self
            .pool
            .pooled()
            .into_iter()
            .filter(|p| !self.ledger.contains_transaction(&p.hash) && self.policy.check(&p.tx))
            .collect();
        let max = self.config.max_transactions_per_block;
        if candidates.len() >= max {
            candidates.sort_by_key(|p| Reverse(p.priority.fee_rate));
        }

        // Each pick must stay valid next to the ones before it
        let limit = max.saturating_sub(1);
        let mut transactions: Vec<Transaction> = Vec::new();
        for candidate in candidates {
            if transactions.len() >= limit {
                break;
            }
            let picked: Vec<&Transaction> = transactions.iter().collect();
            if self.ledger.verify_transaction(&candidate.tx, &picked) {
                transactions.push(candidate.tx);
            } else {
                debug!("Leave out transaction {}", candidate.hash);
            }
        }

        let refs: Vec<&Transaction> = transactions.iter().collect();
        let reward = BlockAssembler::new(&self.config.fee_policy, &self.ledger).reward_transaction(
            &refs,
            self.context.nonce,
            self.wallet.change_address(),
        )?;
        let next_validators = self.ledger.next_validators(&refs);
        transactions.insert(0, reward);

        let hashes = transactions
            .iter()
            .map(Transaction::hash)
            .collect::<Result<Vec<Hash>, _>>()?;
        self.context.next_consensus = consensus_address(&next_validators);
        self.context.transactions = hashes.iter().copied().zip(transactions).collect();
        self.context.transaction_hashes = hashes;

        debug!(
            "Proposal for height {} holds {} transactions",
            self.context.block_index,
            self.context.transaction_hashes.len()
        );
        Ok(())
    }
}
