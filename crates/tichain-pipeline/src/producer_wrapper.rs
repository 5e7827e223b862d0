//! Producer-side resilient wrapper (spec §4.12, component C12): the
//! public `PublishAsync` entry point producers call, composing the
//! shadow buffer (C3), integrity chain (C4) and broker producer (C5) in
//! a fixed order with a precise failure contract.
//!
//! Grounded on `dashflow-streaming::producer`'s write-ahead-then-publish
//! pattern (durable local buffer acknowledged before the network hop is
//! attempted), generalized to interpose the integrity chain between the
//! two.

use crate::error::{Error, Result};
use tichain_broker::BrokerProducer;
use tichain_chain::IntegrityChain;
use tichain_core::DataPointBatch;
use tichain_shadow::ShadowBuffer;
use tracing::{info, warn};

/// Wraps C3 → C4 → C5 behind one `publish` call (spec §4.12).
pub struct ProducerWrapper {
    shadow: ShadowBuffer,
    chain: IntegrityChain,
    producer: BrokerProducer,
}

impl ProducerWrapper {
    pub fn new(shadow: ShadowBuffer, chain: IntegrityChain, producer: BrokerProducer) -> Self {
        Self {
            shadow,
            chain,
            producer,
        }
    }

    /// `PublishAsync(batch)` (spec §4.12):
    /// 1. Buffer into the shadow store. On failure, return without
    ///    touching the chain or the broker.
    /// 2. Create a chain entry, then link the shadow entry to it so gap
    ///    recovery can later recover its sequence/hash headers.
    /// 3. Publish via the broker producer, returning its ack result.
    ///
    /// A step-3 failure leaves the shadow entry unconfirmed; it is picked
    /// up later by the gap recovery controller (C11). A step-2 failure
    /// also leaves it unconfirmed but the chain is otherwise unaffected;
    /// operationally benign, since a gap only becomes visible once a
    /// later entry skips the missing sequence.
    pub async fn publish(&self, batch: &DataPointBatch) -> Result<()> {
        let shadow_id = self
            .shadow
            .buffer(batch, None)
            .await
            .map_err(Error::Shadow)?;

        let entry = self.chain.create_entry(batch).await.map_err(Error::Chain)?;

        if let Err(e) = self.shadow.attach_chain_entry(shadow_id, entry.id).await {
            warn!(
                batch_id = %batch.batch_id,
                shadow_id = %shadow_id,
                chain_entry = %entry.id,
                error = %e,
                "failed to link shadow entry to its chain entry; gap recovery will not be able to replay it with valid chain headers"
            );
        }

        match self.producer.publish(batch, &entry).await {
            Ok(()) => {
                info!(batch_id = %batch.batch_id, shadow_id = %shadow_id, chain_entry = %entry.id, "batch published");
                Ok(())
            }
            Err(e) => {
                warn!(
                    batch_id = %batch.batch_id,
                    shadow_id = %shadow_id,
                    error = %e,
                    "broker publish failed; shadow entry left unconfirmed for gap recovery"
                );
                Err(Error::Broker(e))
            }
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        self.shadow.health_check().await?;
        self.chain.health_check().await?;
        self.producer.health_check().map_err(Error::Broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A full round-trip needs a live SQLite-backed shadow store, chain
    // store and broker, exercised by the `#[ignore]`-gated integration
    // tests alongside the pipeline orchestrator; this module only checks
    // the parts testable without those dependencies.

    #[test]
    fn wrapper_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProducerWrapper>();
    }
}
