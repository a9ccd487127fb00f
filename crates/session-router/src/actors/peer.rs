//! Per-connection media state.
//!
//! A `Peer` owns the transport, producer and consumer handles created through
//! its connection. It lives inside exactly one room actor, which is the only
//! code that mutates it. The mentor/mentee role is not stored here; it travels
//! in each producer's metadata.

use super::messages::{PeerInfo, ProducerInfo};
use crate::engine::{ConsumerHandle, MediaEngine, ProducerHandle, TransportHandle};
use common::PeerId;
use std::collections::HashMap;
use tracing::debug;

/// Producer handle plus its room-local creation sequence number.
#[derive(Debug, Clone)]
pub struct RecordedProducer {
    pub handle: ProducerHandle,
    pub seq: u64,
}

#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    transports: HashMap<String, TransportHandle>,
    producers: HashMap<String, RecordedProducer>,
    consumers: HashMap<String, ConsumerHandle>,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Record a transport. Returns `false` if the id is already recorded.
    pub fn add_transport(&mut self, transport: TransportHandle) -> bool {
        insert_new(&mut self.transports, transport.id.clone(), transport)
    }

    #[must_use]
    pub fn get_transport(&self, transport_id: &str) -> Option<&TransportHandle> {
        self.transports.get(transport_id)
    }

    /// Record a producer. Returns `false` if the id is already recorded.
    pub fn add_producer(&mut self, producer: ProducerHandle, seq: u64) -> bool {
        let id = producer.id.clone();
        insert_new(
            &mut self.producers,
            id,
            RecordedProducer {
                handle: producer,
                seq,
            },
        )
    }

    #[must_use]
    pub fn get_producer(&self, producer_id: &str) -> Option<&RecordedProducer> {
        self.producers.get(producer_id)
    }

    pub fn producers(&self) -> impl Iterator<Item = &RecordedProducer> {
        self.producers.values()
    }

    /// Record a consumer. Returns `false` if the id is already recorded.
    pub fn add_consumer(&mut self, consumer: ConsumerHandle) -> bool {
        insert_new(&mut self.consumers, consumer.id.clone(), consumer)
    }

    #[must_use]
    pub fn get_consumer(&self, consumer_id: &str) -> Option<&ConsumerHandle> {
        self.consumers.get(consumer_id)
    }

    /// Summary of this peer's resources.
    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.id,
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
        }
    }

    /// Producer summary as exposed outside the room.
    #[must_use]
    pub fn producer_info(&self, producer: &RecordedProducer) -> ProducerInfo {
        ProducerInfo {
            producer_id: producer.handle.id.clone(),
            peer_id: self.id,
            kind: producer.handle.kind,
            is_mentor: producer.handle.metadata.is_mentor,
            seq: producer.seq,
        }
    }

    /// Close every handle through the engine and empty the maps.
    ///
    /// Consumers go first, then producers, then the transports they run on.
    /// Returns the number of handles closed.
    pub async fn close_all(&mut self, engine: &dyn MediaEngine) -> usize {
        let mut closed = 0;
        for (id, _) in self.consumers.drain() {
            engine.close_consumer(&id).await;
            closed += 1;
        }
        for (id, _) in self.producers.drain() {
            engine.close_producer(&id).await;
            closed += 1;
        }
        for (id, _) in self.transports.drain() {
            engine.close_transport(&id).await;
            closed += 1;
        }
        debug!(target: "sr.actor.room", peer_id = %self.id, closed, "Peer resources closed");
        closed
    }
}

fn insert_new<V>(map: &mut HashMap<String, V>, id: String, value: V) -> bool {
    if map.contains_key(&id) {
        return false;
    }
    map.insert(id, value);
    true
}
