//! Room bot: a server-side echo participant on a direct transport.
//!
//! The bot owns a `"bot"`-labeled data producer every joining peer gets a
//! data consumer for, and attaches a data consumer to every peer data
//! producer so it can echo their messages back through its own channel.

use crate::errors::RoomError;

use media_engine::events::DataConsumerEvent;
use media_engine::types::{DataProduceOptions, DirectTransportOptions};
use media_engine::{MediaDataProducer, MediaRouter, MediaTransport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Maximum size of a bot message in bytes.
const BOT_MAX_MESSAGE_SIZE: u32 = 512;

/// The room bot.
pub struct Bot {
    transport: Arc<dyn MediaTransport>,
    data_producer: Arc<dyn MediaDataProducer>,
}

impl Bot {
    /// Create the bot on the given router.
    pub async fn create(router: &Arc<dyn MediaRouter>) -> Result<Self, RoomError> {
        let transport = router
            .create_direct_transport(DirectTransportOptions {
                max_message_size: BOT_MAX_MESSAGE_SIZE,
                app_data: Value::Null,
            })
            .await?;

        let data_producer = transport
            .produce_data(DataProduceOptions {
                label: "bot".to_string(),
                protocol: String::new(),
                sctp_stream_parameters: Value::Null,
                app_data: Value::Null,
            })
            .await?;

        Ok(Self {
            transport,
            data_producer,
        })
    }

    /// Id of the bot's data producer.
    #[must_use]
    pub fn data_producer_id(&self) -> String {
        self.data_producer.id()
    }

    /// Attach a bot-side data consumer to a peer data producer and return
    /// its message event stream.
    pub async fn handle_peer_data_producer(
        &self,
        data_producer_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<DataConsumerEvent>, RoomError> {
        let data_consumer = self.transport.consume_data(data_producer_id).await?;
        data_consumer
            .events()
            .ok_or_else(|| RoomError::Internal("data consumer events already taken".to_string()))
    }

    /// Send a message through the bot's data producer.
    pub async fn send(&self, text: &str) -> Result<(), RoomError> {
        self.data_producer.send(text).await.map_err(Into::into)
    }

    /// Close the bot's engine resources.
    pub fn close(&self) {
        self.data_producer.close();
        self.transport.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use media_engine::loopback::LoopbackEngine;
    use media_engine::types::WorkerSettings;
    use media_engine::MediaEngine;

    async fn router() -> (LoopbackEngine, Arc<dyn MediaRouter>) {
        let engine = LoopbackEngine::new();
        let worker = engine
            .create_worker(&WorkerSettings {
                log_level: "warn".to_string(),
                log_tags: vec![],
                rtc_min_port: 40_000,
                rtc_max_port: 49_999,
            })
            .await
            .unwrap();
        let router = worker.create_router(vec![]).await.unwrap();
        (engine, router)
    }

    #[tokio::test]
    async fn test_bot_owns_labeled_data_producer() {
        let (engine, router) = router().await;
        let bot = Bot::create(&router).await.unwrap();

        assert_eq!(
            engine.data_producers_with_label("bot"),
            vec![bot.data_producer_id()]
        );
    }

    #[tokio::test]
    async fn test_bot_attaches_to_peer_data_producer() {
        let (engine, router) = router().await;
        let bot = Bot::create(&router).await.unwrap();

        // A peer-side data producer on some other transport.
        let peer_transport = router
            .create_direct_transport(DirectTransportOptions {
                max_message_size: 512,
                app_data: Value::Null,
            })
            .await
            .unwrap();
        let peer_data_producer = peer_transport
            .produce_data(DataProduceOptions {
                label: "chat".to_string(),
                protocol: String::new(),
                sctp_stream_parameters: Value::Null,
                app_data: Value::Null,
            })
            .await
            .unwrap();

        let mut events = bot
            .handle_peer_data_producer(&peer_data_producer.id())
            .await
            .unwrap();

        let consumer_ids = engine.data_consumers_of(&peer_data_producer.id());
        assert_eq!(consumer_ids.len(), 1);

        assert!(engine.emit_data_message(&consumer_ids[0], "hi", 51));
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            DataConsumerEvent::Message { payload, ppid: 51 } if payload == "hi"
        ));
    }
}
