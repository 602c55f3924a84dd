use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::events::ConsensusEvent;
use crate::ports::Ledger;
use crate::service::ConsensusService;

/// Capacity of a node's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Start `service` and feed it events until every sender is dropped.
///
/// Events are handled one at a time, so no two handlers ever overlap.
pub async fn run<L>(mut service: ConsensusService<L>, mut events: mpsc::Receiver<ConsensusEvent>)
where
    L: Ledger + Send + 'static,
{
    service.start();
    while let Some(event) = events.recv().await {
        service.handle(event);
    }
    info!(
        "Consensus service stopped at height {}",
        service.context().block_index
    );
}

/// Spawn [`run`] on the current runtime
pub fn spawn<L>(
    service: ConsensusService<L>,
    events: mpsc::Receiver<ConsensusEvent>,
) -> JoinHandle<()>
where
    L: Ledger + Send + 'static,
{
    tokio::spawn(run(service, events))
}
