use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::address::Address;
use crate::quantity::Quantity;
use crate::types::committee::CommitteeKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub tokens: Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    pub owner: Address,
    pub tokens: Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEscrowEvent {
    pub owner: Address,
    pub escrow: Address,
    pub tokens: Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeEscrowEvent {
    pub owner: Address,
    pub tokens: Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimEscrowEvent {
    pub owner: Address,
    pub escrow: Address,
    pub tokens: Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    Add(AddEscrowEvent),
    Take(TakeEscrowEvent),
    Reclaim(ReclaimEscrowEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectedEvent {
    pub kinds: Vec<CommitteeKind>,
}

/// A typed event recorded while executing a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Transfer(TransferEvent),
    Burn(BurnEvent),
    Escrow(EscrowEvent),
    Elected(ElectedEvent),
}

impl Event {
    pub fn is_take_escrow(&self) -> bool {
        matches!(self, Event::Escrow(EscrowEvent::Take(_)))
    }
}

/// Out-of-block event distribution.
///
/// The in-block event log is buffered by the block context and only handed
/// to the bus once the block commits; subscribers never observe events from
/// rolled-back transactions. Subscriptions are bounded: a subscriber that
/// falls behind observes a lag error and is dropped by the channel.
pub struct EventBus {
    transfers: broadcast::Sender<TransferEvent>,
    burns: broadcast::Sender<BurnEvent>,
    escrows: broadcast::Sender<EscrowEvent>,
    by_height: RwLock<BTreeMap<u64, Vec<Event>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (transfers, _) = broadcast::channel(capacity);
        let (burns, _) = broadcast::channel(capacity);
        let (escrows, _) = broadcast::channel(capacity);
        Self {
            transfers,
            burns,
            escrows,
            by_height: RwLock::new(BTreeMap::new()),
        }
    }

    /// Records a committed block's events and fans them out to subscribers.
    pub fn publish_block(&self, height: u64, events: Vec<Event>) {
        for event in &events {
            match event {
                Event::Transfer(event) => {
                    let _ = self.transfers.send(event.clone());
                }
                Event::Burn(event) => {
                    let _ = self.burns.send(event.clone());
                }
                Event::Escrow(event) => {
                    let _ = self.escrows.send(event.clone());
                }
                Event::Elected(_) => {}
            }
        }
        self.by_height.write().insert(height, events);
    }

    pub fn events_at(&self, height: u64) -> Option<Vec<Event>> {
        self.by_height.read().get(&height).cloned()
    }

    pub fn watch_transfers(&self) -> broadcast::Receiver<TransferEvent> {
        self.transfers.subscribe()
    }

    pub fn watch_burns(&self) -> broadcast::Receiver<BurnEvent> {
        self.burns.subscribe()
    }

    pub fn watch_escrows(&self) -> broadcast::Receiver<EscrowEvent> {
        self.escrows.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_events_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut transfers = bus.watch_transfers();
        let event = TransferEvent {
            from: Address::default(),
            to: Address::default(),
            tokens: Quantity::from_u64(5),
        };
        bus.publish_block(1, vec![Event::Transfer(event.clone())]);
        assert_eq!(transfers.try_recv().unwrap(), event);
        assert_eq!(bus.events_at(1).unwrap().len(), 1);
        assert!(bus.events_at(2).is_none());
    }

    #[test]
    fn lagging_subscribers_observe_an_error() {
        let bus = EventBus::new(1);
        let mut burns = bus.watch_burns();
        for height in 0..3 {
            bus.publish_block(
                height,
                vec![Event::Burn(BurnEvent {
                    owner: Address::default(),
                    tokens: Quantity::from_u64(height),
                })],
            );
        }
        assert!(matches!(
            burns.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
