use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::ConsensusConfig;
use crate::context::RoundContext;
use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::net::{ConsensusMessage, ConsensusPayload};
use crate::ports::{
    AcceptAll, Clock, Ledger, SystemClock, TimerScheduler, TransactionPolicy, TransactionPool,
    Transport, Wallet,
};
use crate::timer::{backoff, TimerTick};

/// dBFT state machine for one node.
///
/// All three triggers (persisted block, peer message, timer) go through
/// [`ConsensusService::handle`], which runs each handler to completion.
pub struct ConsensusService<L: Ledger> {
    pub(crate) config: ConsensusConfig,
    pub(crate) context: RoundContext,
    pub(crate) ledger: L,
    pub(crate) pool: Arc<dyn TransactionPool>,
    pub(crate) wallet: Arc<dyn Wallet>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) timer: Box<dyn TimerScheduler>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: Box<dyn TransactionPolicy>,
    /// Round the timer is currently armed for
    pub(crate) timer_tick: TimerTick,
    /// When the last block was persisted, in clock milliseconds
    pub(crate) block_received_at: u64,
}

impl<L: Ledger> ConsensusService<L> {
    pub fn new(
        config: ConsensusConfig,
        ledger: L,
        pool: Arc<dyn TransactionPool>,
        wallet: Arc<dyn Wallet>,
        transport: Arc<dyn Transport>,
        timer: Box<dyn TimerScheduler>,
    ) -> Self {
        ConsensusService {
            context: RoundContext::new(config.version),
            config,
            ledger,
            pool,
            wallet,
            transport,
            timer,
            clock: Arc::new(SystemClock),
            policy: Box::new(AcceptAll),
            timer_tick: TimerTick::default(),
            block_received_at: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn TransactionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn context(&self) -> &RoundContext {
        &self.context
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    /// Round the timer is armed for
    pub fn timer_tick(&self) -> TimerTick {
        self.timer_tick
    }

    /// Begin consensus on top of the ledger's current tip
    pub fn start(&mut self) {
        info!("Consensus service starting at height {}", self.ledger.height());
        self.block_received_at = self.clock.now_millis();
        self.initialize_consensus(0);
    }

    /// Dispatch one trigger. Errors only ever mean the input was dropped.
    pub fn handle(&mut self, event: ConsensusEvent) {
        match event {
            ConsensusEvent::BlockPersisted => self.on_block_persisted(),
            ConsensusEvent::Payload(payload) => {
                if let Err(e) = self.on_payload(payload) {
                    debug!("Dropped consensus payload: {}", e);
                }
            }
            ConsensusEvent::Transaction(tx) => {
                self.on_transaction(tx);
            }
            ConsensusEvent::Timeout(tick) => {
                if let Err(e) = self.on_timeout(tick) {
                    warn!("Timeout handling failed: {}", e);
                }
            }
        }
    }

    pub fn on_block_persisted(&mut self) {
        info!(
            "Persisted block {} at height {}",
            self.ledger.current_block_hash(),
            self.ledger.height()
        );
        self.block_received_at = self.clock.now_millis();
        self.initialize_consensus(0);
    }

    /// Timer expiry for `tick`; ignored unless it matches the current round
    pub fn on_timeout(&mut self, tick: TimerTick) -> Result<(), ConsensusError> {
        let current = TimerTick::new(self.context.block_index, self.context.view_number);
        if tick != current {
            trace!(%tick, %current, "Ignoring stale timer");
            return Ok(());
        }
        if self.context.my_index.is_none() {
            return Ok(());
        }

        info!(
            "Timeout: height={} view={} state={}",
            tick.height, tick.view, self.context.state
        );
        let state = self.context.state;
        if state.is_primary() && !state.request_sent {
            self.send_prepare_request()?;
        } else if state.is_primary() || state.is_backup() {
            self.request_change_view();
        }
        Ok(())
    }

    pub(crate) fn initialize_consensus(&mut self, view_number: u8) {
        if view_number == 0 {
            let block_index = self.ledger.height() + 1;
            let validators = self.ledger.validators(block_index);
            let my_index = validators.iter().position(|key| self.wallet.contains_key(key));
            self.context
                .reset(block_index, self.ledger.current_block_hash(), validators, my_index);
        } else {
            self.context.change_view(view_number);
        }

        let Some(my_index) = self.context.my_index else {
            debug!("Not a validator at height {}", self.context.block_index);
            return;
        };

        info!(
            "Initialize: height={} view={} index={} role={}",
            self.context.block_index, view_number, my_index, self.context.state
        );

        if self.context.is_primary() {
            let elapsed = self
                .clock
                .now_millis()
                .saturating_sub(self.block_received_at);
            let after = self
                .config
                .block_time
                .saturating_sub(Duration::from_millis(elapsed));
            self.arm_timer(after);
        } else {
            self.arm_timer(backoff(self.config.block_time, view_number));
        }
    }

    pub(crate) fn arm_timer(&mut self, after: Duration) {
        self.timer_tick = TimerTick::new(self.context.block_index, self.context.view_number);
        self.timer.schedule(self.timer_tick, after);
    }

    /// Vote to leave the current view
    pub(crate) fn request_change_view(&mut self) {
        let Some(me) = self.context.my_index else {
            return;
        };
        self.context.state.view_changing = true;
        let Some(vote) = self.context.expected_view.get_mut(me) else {
            return;
        };
        *vote = vote.saturating_add(1);
        let new_view = *vote;

        warn!(
            "Request change view: height={} view={} nv={} state={}",
            self.context.block_index, self.context.view_number, new_view, self.context.state
        );
        self.arm_timer(backoff(self.config.block_time, new_view));
        let message = self.context.make_change_view();
        self.sign_and_relay(&message);
        self.check_expected_view(new_view);
    }

    /// Move to `view_number` once a quorum voted for it
    pub(crate) fn check_expected_view(&mut self, view_number: u8) {
        if view_number <= self.context.view_number {
            return;
        }
        if self.context.view_votes(view_number) >= self.context.m() {
            self.initialize_consensus(view_number);
        }
    }

    /// Sign `message` into an envelope and broadcast it. A failure to sign
    /// skips the broadcast.
    pub(crate) fn sign_and_relay(&self, message: &ConsensusMessage) {
        let payload = match self.sign_payload(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Not sending {}: {}", message.kind(), e);
                return;
            }
        };
        if !self.transport.broadcast(payload) {
            debug!("Transport refused {}", message.kind());
        }
    }

    fn sign_payload(&self, message: &ConsensusMessage) -> Result<ConsensusPayload, ConsensusError> {
        let mut payload = self.context.make_payload(message)?;
        let key = self.context.my_key().ok_or(ConsensusError::NotValidator)?;
        payload.witness = self.wallet.sign(key, &payload.unsigned_bytes()?)?;
        Ok(payload)
    }

    /// This node's signature over the current proposal's header
    pub(crate) fn sign_header(&self) -> Result<pure_core::Sig, ConsensusError> {
        let header = self
            .context
            .make_header()
            .ok_or_else(|| ConsensusError::InvalidBlock("no proposal".to_string()))?;
        let key = self.context.my_key().ok_or(ConsensusError::NotValidator)?;
        Ok(self.wallet.sign(key, header.hash()?.as_bytes())?)
    }
}
