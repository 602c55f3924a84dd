use std::sync::Arc;

use anyhow::Result;
use pure_consensus::runner::EVENT_CHANNEL_CAPACITY;
use pure_consensus::{
    verify_qc, ConsensusConfig, ConsensusError, ConsensusEvent, ConsensusPayload,
    ConsensusService, KeyPairWallet, TokioTimer, Transport,
};
use pure_core::{Block, GenesisConfig, KeyPair};
use pure_mempool::{Mempool, MempoolConfig};
use pure_state::ChainState;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::txgen::{self, TxGenerator};

/// Backlog of committed blocks a slow subscriber may fall behind by
const BLOCK_FEED_CAPACITY: usize = 256;

/// In-process network: every validator's event channel plus the block feed
struct Network {
    peers: Vec<mpsc::Sender<ConsensusEvent>>,
    blocks: broadcast::Sender<Block>,
}

/// One validator's view of the in-process network
struct LoopbackTransport {
    me: usize,
    network: Arc<Network>,
}

impl Transport for LoopbackTransport {
    fn broadcast(&self, payload: ConsensusPayload) -> bool {
        for (index, peer) in self.network.peers.iter().enumerate() {
            if index == self.me {
                continue;
            }
            // A silent or stopped peer has no receiver; that is not an error here
            if let Err(e) = peer.try_send(ConsensusEvent::Payload(payload.clone())) {
                debug!("Payload to validator {} not delivered: {}", index, e);
            }
        }
        true
    }

    fn relay_block(&self, block: Block) -> bool {
        self.network.blocks.send(block).is_ok()
    }
}

/// A devnet of in-process validators sharing one transaction pool
pub struct Devnet {
    config: NodeConfig,
    genesis: GenesisConfig,
    consensus: ConsensusConfig,
    keys: Vec<KeyPair>,
    pool: Arc<Mempool>,
}

impl Devnet {
    /// Create a devnet from configuration
    pub fn new(config: NodeConfig) -> Result<Self> {
        let genesis = config.to_genesis_config()?;
        let consensus = config.consensus_config()?;
        let keys = config.validator_keypairs()?;
        let pool = Arc::new(Mempool::new(MempoolConfig {
            max_size: config.mempool_max_size,
            ..Default::default()
        }));

        Ok(Devnet {
            config,
            genesis,
            consensus,
            keys,
            pool,
        })
    }

    /// Run until `stop_at_height` is committed or the process is interrupted
    pub async fn run(self) -> Result<()> {
        let chain = ChainState::from_genesis(&self.genesis)?;
        info!(
            "Starting devnet with {} validators ({} silent), genesis {}",
            self.keys.len(),
            self.config.silent_validators.len(),
            chain.head_hash()
        );

        let (senders, receivers): (Vec<_>, Vec<_>) = self
            .keys
            .iter()
            .map(|_| mpsc::channel(EVENT_CHANNEL_CAPACITY))
            .unzip();
        let (block_tx, _) = broadcast::channel(BLOCK_FEED_CAPACITY);
        let network = Arc::new(Network {
            peers: senders.clone(),
            blocks: block_tx.clone(),
        });

        for (index, events) in receivers.into_iter().enumerate() {
            if self.config.silent_validators.contains(&index) {
                info!("Validator {} stays silent", index);
                continue;
            }
            let transport = Arc::new(LoopbackTransport {
                me: index,
                network: Arc::clone(&network),
            });
            let service = ConsensusService::new(
                self.consensus.clone(),
                chain.clone(),
                self.pool.clone(),
                Arc::new(KeyPairWallet::new(self.keys[index].clone())),
                transport,
                Box::new(TokioTimer::new(senders[index].clone())),
            );
            let blocks = block_tx.subscribe();
            let pool = Arc::clone(&self.pool);
            tokio::spawn(run_validator(service, events, blocks, pool));
        }

        if let Some(ref settings) = self.config.txgen {
            let generator = TxGenerator::new(
                chain.clone(),
                self.config.faucet_keypair()?,
                Arc::clone(&self.pool),
                settings.amount.parse()?,
                settings.fee.parse()?,
            );
            let interval = std::time::Duration::from_millis(settings.interval_ms.max(1));
            tokio::spawn(txgen::run(generator, block_tx.subscribe(), interval));
        }

        let watch = watch_blocks(block_tx.subscribe(), chain.height(), self.config.stop_at_height);
        tokio::select! {
            _ = watch => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted, shutting down");
            }
        }
        Ok(())
    }
}

/// A validator task: its consensus service plus the blocks it imports
async fn run_validator(
    mut service: ConsensusService<ChainState>,
    mut events: mpsc::Receiver<ConsensusEvent>,
    mut blocks: broadcast::Receiver<Block>,
    pool: Arc<Mempool>,
) {
    service.start();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => service.handle(event),
                None => break,
            },
            block = blocks.recv() => match block {
                Ok(block) => {
                    if let Err(e) = import_block(&mut service, &pool, block) {
                        warn!("Reject block: {}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} relayed blocks", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Check and persist a relayed block, then move consensus to the next
/// height. Copies of blocks already persisted are skipped.
fn import_block(
    service: &mut ConsensusService<ChainState>,
    pool: &Mempool,
    block: Block,
) -> Result<(), ConsensusError> {
    let chain = service.ledger();
    if block.index() <= chain.height() {
        return Ok(());
    }
    verify_qc(&block.header, &block.qc, &chain.validators)?;

    let hashes = block.transaction_hashes()?;
    service.ledger_mut().persist_block(block)?;
    pool.remove_committed(&hashes);
    let chain = service.ledger();
    let dropped = pool.retain(|tx| !chain.spends_committed_input(tx));
    if dropped > 0 {
        debug!("Dropped {} pooled transactions spending committed inputs", dropped);
    }
    service.handle(ConsensusEvent::BlockPersisted);
    Ok(())
}

/// Log each newly committed height; returns once `stop_at` is reached
async fn watch_blocks(mut blocks: broadcast::Receiver<Block>, mut height: u64, stop_at: Option<u64>) {
    loop {
        match blocks.recv().await {
            Ok(block) if block.index() > height => {
                height = block.index();
                info!(
                    "Committed block {} at height {} with {} transactions, {} signatures",
                    block.hash().unwrap_or_default(),
                    height,
                    block.transactions.len(),
                    block.qc.signature_count()
                );
                if stop_at.is_some_and(|stop| height >= stop) {
                    info!("Reached height {}, stopping", height);
                    return;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Watcher missed {} blocks", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_sample_config;

    #[test]
    fn test_devnet_creation() {
        let config = generate_sample_config(4);
        let devnet = Devnet::new(config).unwrap();
        assert_eq!(devnet.keys.len(), 4);
        assert_eq!(devnet.genesis.validators.len(), 4);
    }

    #[tokio::test]
    async fn test_devnet_commits_with_silent_validator() {
        let mut config = generate_sample_config(4);
        config.block_time_ms = 100;
        config.silent_validators = vec![0];
        config.stop_at_height = Some(2);
        config.txgen.as_mut().unwrap().interval_ms = 20;

        let devnet = Devnet::new(config).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(30), devnet.run())
            .await
            .expect("devnet reached its stop height")
            .unwrap();
    }
}
