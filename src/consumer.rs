//! `Consumer`: a named handle around the delivery stream returned by
//! `Channel::basic_consume`.
//!
//! # Examples
//!
//! ```no_run
//! # async fn doc(channel: dumq_amqp::channel::Channel) -> dumq_amqp::error::AmqpResult<()> {
//! let mut consumer = dumq_amqp::consumer::Consumer::new(
//!     channel.clone(),
//!     "my-tag".to_string(),
//!     "my-queue".to_string(),
//!     channel.basic_consume("my-queue", "my-tag", false, false).await?,
//! );
//! while let Some(message) = consumer.recv().await {
//!     println!("{:?}", message.body_as_text());
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::channel::Channel;
use crate::error::AmqpResult;
use crate::message::DeliveredMessage;

/// A subscription created by `Channel::basic_consume`, pairing the
/// delivery receiver with the consumer tag and queue name it was
/// registered under so `cancel` doesn't need them repeated.
pub struct Consumer {
    channel: Channel,
    tag: String,
    queue: String,
    receiver: mpsc::Receiver<DeliveredMessage>,
}

impl Consumer {
    pub fn new(channel: Channel, tag: String, queue: String, receiver: mpsc::Receiver<DeliveredMessage>) -> Self {
        Consumer { channel, tag, queue, receiver }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Await the next delivery. Returns `None` once the channel has
    /// closed or the consumer has been cancelled by the broker.
    pub async fn recv(&mut self) -> Option<DeliveredMessage> {
        self.receiver.recv().await
    }

    /// Cancel this subscription on the broker and stop receiving
    /// further deliveries.
    pub async fn cancel(&mut self, no_wait: bool) -> AmqpResult<()> {
        self.channel.basic_cancel(&self.tag, no_wait).await?;
        self.receiver.close();
        Ok(())
    }
}

impl Stream for Consumer {
    type Item = DeliveredMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[tokio::test]
    async fn recv_yields_queued_deliveries() {
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(1, outbound_tx, 131_072);
        let (tx, rx) = mpsc::channel(4);
        let mut consumer = Consumer::new(channel, "tag-1".to_string(), "q".to_string(), rx);

        let message = DeliveredMessage {
            consumer_tag: Some("tag-1".to_string()),
            delivery_tag: 1,
            redelivered: false,
            exchange: "".to_string(),
            routing_key: "q".to_string(),
            properties: Default::default(),
            payload: bytes::Bytes::from_static(b"hi"),
        };
        tx.send(message).await.unwrap();
        drop(tx);

        let received = consumer.recv().await.unwrap();
        assert_eq!(received.body_as_text(), Some("hi"));
        assert!(consumer.recv().await.is_none());
    }

    #[test]
    fn accessors_expose_tag_and_queue() {
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(1, outbound_tx, 131_072);
        let (_tx, rx) = mpsc::channel(1);
        let consumer = Consumer::new(channel, "tag-1".to_string(), "q".to_string(), rx);
        assert_eq!(consumer.tag(), "tag-1");
        assert_eq!(consumer.queue(), "q");
    }
}
