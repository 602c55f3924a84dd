use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pure_consensus::fees::UTILITY_ASSET;
use pure_core::{
    asset_id_for, Block, CoinReference, Fixed8, Hash, KeyPair, ScriptHash, Transaction,
    TransactionKind, TxOutput,
};
use pure_mempool::Mempool;
use pure_state::ChainState;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Spends faucet outputs into the shared pool.
///
/// Keeps its own copy of the chain, fed by committed blocks, to know which
/// faucet outputs are still unspent.
pub struct TxGenerator {
    chain: ChainState,
    faucet: KeyPair,
    pool: Arc<Mempool>,
    amount: Fixed8,
    fee: Fixed8,
    /// Faucet outputs spent by transactions still waiting in the pool
    pending: HashSet<CoinReference>,
}

impl TxGenerator {
    pub fn new(
        chain: ChainState,
        faucet: KeyPair,
        pool: Arc<Mempool>,
        amount: Fixed8,
        fee: Fixed8,
    ) -> Self {
        TxGenerator {
            chain,
            faucet,
            pool,
            amount,
            fee,
            pending: HashSet::new(),
        }
    }

    /// Follow a committed block. Blocks already seen are skipped.
    pub fn import(&mut self, block: Block) -> Result<()> {
        if block.index() <= self.chain.height() {
            return Ok(());
        }
        self.chain.persist_block(block)?;
        let chain = &self.chain;
        self.pending.retain(|coin| chain.is_unspent(coin));
        Ok(())
    }

    /// Pool one transfer from the faucet, returning its hash. `None` when no
    /// faucet output is free to spend.
    pub fn generate(&mut self) -> Result<Option<Hash>> {
        let utility = asset_id_for(UTILITY_ASSET);
        let owner = self.faucet.public.script_hash();
        let needed = self.amount + self.fee;

        let Some((coin, output)) = self
            .chain
            .unspent_for(&owner)
            .into_iter()
            .find(|(coin, output)| {
                output.asset_id == utility && output.value >= needed && !self.pending.contains(coin)
            })
        else {
            return Ok(None);
        };

        let recipient = ScriptHash::of(&rand::random::<[u8; 32]>());
        let mut outputs = vec![TxOutput::new(utility, self.amount, recipient)];
        let change = output.value - needed;
        if change.is_positive() {
            outputs.push(TxOutput::new(utility, change, owner));
        }
        let mut tx = Transaction::new(TransactionKind::Contract, vec![coin], outputs);
        tx.sign(&self.faucet.secret)?;

        self.chain.verify_transaction(&tx, &[])?;
        let network_fee = self.chain.network_fee(&tx, &utility)?;
        let hash = self.pool.add(tx, network_fee)?;
        self.pending.insert(coin);
        Ok(Some(hash))
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Generate one transaction per `interval` until the block feed closes
pub async fn run(mut generator: TxGenerator, mut blocks: broadcast::Receiver<Block>, interval: Duration) {
    info!("Transaction generator running every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => match generator.generate() {
                Ok(Some(hash)) => debug!("Generated transaction {}", hash),
                Ok(None) => debug!("No faucet output free, {} pending", generator.pending()),
                Err(e) => warn!("Transaction generation failed: {}", e),
            },
            block = blocks.recv() => match block {
                Ok(block) => {
                    if let Err(e) = generator.import(block) {
                        warn!("Generator could not follow block: {}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Generator missed {} blocks", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }
}
