//! Channel-level engine: per-channel state, request/response
//! correlation, multi-frame content assembly, and the Basic/Exchange/
//! Queue/Confirm operations exposed to applications.
//!
//! A `Channel` is a cheap, `Clone`-able handle around a shared
//! `Arc<Mutex<ChannelInner>>`; the actual frames are written through an
//! `mpsc` sender owned by the connection (`client.rs`) so that writes
//! from concurrently-held channel handles never interleave mid-frame.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::codec::{read_native_sequence, write_native_sequence, ArgKind};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::Frame;
use crate::message::{BasicProperties, DeliveredMessage, OutboundMessage};
use crate::spec_tables::{basic, channel as chan, class, confirm, exchange, queue};
use crate::value::{FieldTable, FieldValue};

/// Maximum content size this client will assemble before giving up on
/// a delivery and closing the channel.
const MAX_CONTENT_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// A FIFO-correlated in-flight request, matched by `(class_id,
/// method_id)` of the expected reply, not by position.
struct RequestTracker {
    class_id: u16,
    method_id: u16,
    sink: oneshot::Sender<AmqpResult<Vec<FieldValue>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryKind {
    Consumer,
    Get,
    /// `Basic.Return`: still carries a header/body pair that must be
    /// drained to keep the frame stream in sync, even though nothing
    /// downstream consumes the content.
    Return,
}

/// Accumulator for an in-progress `Basic.Deliver`/`Basic.GetOk`/
/// `Basic.Return`.
struct PendingDelivery {
    kind: DeliveryKind,
    consumer_tag: Option<String>,
    delivery_tag: u64,
    redelivered: bool,
    exchange: String,
    routing_key: String,
    message_count: Option<u32>,
    content_size: Option<u64>,
    properties: Option<BasicProperties>,
    payload: BytesMut,
}

struct ChannelInner {
    state: ChannelState,
    flow_active: bool,
    trackers: Vec<RequestTracker>,
    pending: Option<PendingDelivery>,
    consumers: HashMap<String, mpsc::Sender<DeliveredMessage>>,
    confirm_mode: bool,
    next_publish_seqno: u64,
    confirms: Option<mpsc::Sender<ConfirmEvent>>,
    /// `Basic.Get` doesn't fit the generic `(class_id, method_id)`
    /// tracker: its real reply is the assembled message, which only
    /// exists once the header/body frames following `GetOk` complete.
    get_tracker: Option<oneshot::Sender<AmqpResult<Option<(DeliveredMessage, u32)>>>>,
}

/// A `Basic.Ack`/`Basic.Nack` observed on a channel in confirm mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmEvent {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub acked: bool,
}

/// A per-channel handle. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Channel {
    id: u16,
    inner: Arc<Mutex<ChannelInner>>,
    outbound: mpsc::UnboundedSender<Frame>,
    max_frame_size: u32,
}

impl Channel {
    pub(crate) fn new(id: u16, outbound: mpsc::UnboundedSender<Frame>, max_frame_size: u32) -> Self {
        Channel {
            id,
            inner: Arc::new(Mutex::new(ChannelInner {
                state: ChannelState::Closed,
                flow_active: true,
                trackers: Vec::new(),
                pending: None,
                consumers: HashMap::new(),
                confirm_mode: false,
                next_publish_seqno: 1,
                confirms: None,
                get_tracker: None,
            })),
            outbound,
            max_frame_size,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    fn send(&self, frame: Frame) -> AmqpResult<()> {
        self.outbound.send(frame).map_err(|_| AmqpError::protocol("connection write half is gone"))
    }

    /// Queue a request tracker and send `frame`, then await the
    /// correlated reply's decoded arguments. `no_wait` callers should
    /// not call this at all (see `basic_consume`/`basic_cancel`).
    async fn call(&self, frame: Frame, expect_class: u16, expect_method: u16) -> AmqpResult<Vec<FieldValue>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.trackers.push(RequestTracker { class_id: expect_class, method_id: expect_method, sink: tx });
        }
        self.send(frame)?;
        rx.await.map_err(|_| AmqpError::protocol("channel closed before reply arrived"))?
    }

    fn method_frame(&self, class_id: u16, method_id: u16, kinds: &[ArgKind], values: &[FieldValue]) -> AmqpResult<Frame> {
        let mut arguments = BytesMut::new();
        write_native_sequence(&mut arguments, kinds, values)?;
        Ok(Frame::Method { channel: self.id, class_id, method_id, arguments: arguments.freeze() })
    }

    pub async fn open(&self) -> AmqpResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = ChannelState::Opening;
        }
        let frame = self.method_frame(class::CHANNEL, chan::OPEN, &[], &[])?;
        self.call(frame, class::CHANNEL, chan::OPEN_OK).await?;
        self.inner.lock().await.state = ChannelState::Open;
        Ok(())
    }

    pub async fn declare_exchange(&self, name: &str, kind: &str, durable: bool, auto_delete: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Table];
        let values = [
            FieldValue::ShortString(name.to_string()),
            FieldValue::ShortString(kind.to_string()),
            FieldValue::Boolean(false),
            FieldValue::Boolean(durable),
            FieldValue::Boolean(auto_delete),
            FieldValue::Table(FieldTable::new()),
        ];
        let frame = self.method_frame(class::EXCHANGE, exchange::DECLARE, &kinds, &values)?;
        self.call(frame, class::EXCHANGE, exchange::DECLARE_OK).await?;
        Ok(())
    }

    pub async fn declare_queue(&self, name: &str, durable: bool, exclusive: bool, auto_delete: bool) -> AmqpResult<(String, u32, u32)> {
        let kinds = [ArgKind::ShortStr, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Table];
        let values = [
            FieldValue::ShortString(name.to_string()),
            FieldValue::Boolean(false),
            FieldValue::Boolean(durable),
            FieldValue::Boolean(exclusive),
            FieldValue::Boolean(auto_delete),
            FieldValue::Boolean(false),
            FieldValue::Table(FieldTable::new()),
        ];
        let frame = self.method_frame(class::QUEUE, queue::DECLARE, &kinds, &values)?;
        let reply = self.call(frame, class::QUEUE, queue::DECLARE_OK).await?;
        match (&reply[0], &reply[1], &reply[2]) {
            (FieldValue::ShortString(name), FieldValue::LongUInt(message_count), FieldValue::LongUInt(consumer_count)) => {
                Ok((name.clone(), *message_count, *consumer_count))
            }
            _ => Err(AmqpError::protocol("Queue.DeclareOk had unexpected argument shape")),
        }
    }

    pub async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AmqpResult<()> {
        let kinds = [ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Bit, ArgKind::Table];
        let values = [
            FieldValue::ShortString(queue.to_string()),
            FieldValue::ShortString(exchange.to_string()),
            FieldValue::ShortString(routing_key.to_string()),
            FieldValue::Boolean(false),
            FieldValue::Table(FieldTable::new()),
        ];
        let frame = self.method_frame(class::QUEUE, queue::BIND, &kinds, &values)?;
        self.call(frame, class::QUEUE, queue::BIND_OK).await?;
        Ok(())
    }

    pub async fn basic_qos(&self, prefetch_count: u16, global: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::Long, ArgKind::Short, ArgKind::Bit];
        let values = [FieldValue::LongUInt(0), FieldValue::ShortUInt(prefetch_count), FieldValue::Boolean(global)];
        let frame = self.method_frame(class::BASIC, basic::QOS, &kinds, &values)?;
        self.call(frame, class::BASIC, basic::QOS_OK).await?;
        Ok(())
    }

    pub async fn confirm_select(&self, no_wait: bool) -> AmqpResult<mpsc::Receiver<ConfirmEvent>> {
        let kinds = [ArgKind::Bit];
        let values = [FieldValue::Boolean(no_wait)];
        let frame = self.method_frame(class::CONFIRM, confirm::SELECT, &kinds, &values)?;

        let (tx, rx) = mpsc::channel(256);
        {
            let mut inner = self.inner.lock().await;
            inner.confirm_mode = true;
            inner.confirms = Some(tx);
        }

        if no_wait {
            self.send(frame)?;
        } else {
            self.call(frame, class::CONFIRM, confirm::SELECT_OK).await?;
        }
        Ok(rx)
    }

    pub async fn basic_publish(&self, message: OutboundMessage) -> AmqpResult<Option<u64>> {
        let kinds = [ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Bit, ArgKind::Bit];
        let values = [
            FieldValue::ShortString(message.exchange.clone()),
            FieldValue::ShortString(message.routing_key.clone()),
            FieldValue::Boolean(message.mandatory),
            FieldValue::Boolean(message.immediate),
        ];
        let method = self.method_frame(class::BASIC, basic::PUBLISH, &kinds, &values)?;
        self.send(method)?;

        let (flags, props_body) = message.properties.encode()?;
        let mut properties = BytesMut::new();
        properties.extend_from_slice(&flags.to_be_bytes());
        properties.extend_from_slice(&props_body);
        let header = Frame::Header {
            channel: self.id,
            class_id: class::BASIC,
            content_size: message.payload.len() as u64,
            properties: properties.freeze(),
        };
        self.send(header)?;

        let chunk_size = (self.max_frame_size.saturating_sub(8)).max(1) as usize;
        for chunk in message.payload.chunks(chunk_size.max(1)) {
            self.send(Frame::Body { channel: self.id, payload: Bytes::copy_from_slice(chunk) })?;
        }

        let mut inner = self.inner.lock().await;
        if inner.confirm_mode {
            let seqno = inner.next_publish_seqno;
            inner.next_publish_seqno += 1;
            Ok(Some(seqno))
        } else {
            Ok(None)
        }
    }

    pub async fn basic_consume(&self, queue: &str, tag: &str, no_ack: bool, exclusive: bool) -> AmqpResult<mpsc::Receiver<DeliveredMessage>> {
        {
            let inner = self.inner.lock().await;
            if inner.consumers.contains_key(tag) {
                return Err(AmqpError::invalid_argument(format!("consumer tag '{}' already registered", tag)));
            }
        }

        let kinds = [ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Bit, ArgKind::Table];
        let values = [
            FieldValue::ShortString(queue.to_string()),
            FieldValue::ShortString(tag.to_string()),
            FieldValue::Boolean(false),
            FieldValue::Boolean(no_ack),
            FieldValue::Boolean(exclusive),
            FieldValue::Boolean(false),
            FieldValue::Table(FieldTable::new()),
        ];
        let frame = self.method_frame(class::BASIC, basic::CONSUME, &kinds, &values)?;
        let reply = self.call(frame, class::BASIC, basic::CONSUME_OK).await?;
        let server_tag = match &reply[0] {
            FieldValue::ShortString(s) => s.clone(),
            _ => tag.to_string(),
        };

        let (tx, rx) = mpsc::channel(256);
        self.inner.lock().await.consumers.insert(server_tag, tx);
        Ok(rx)
    }

    pub async fn basic_cancel(&self, tag: &str, no_wait: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::ShortStr, ArgKind::Bit];
        let values = [FieldValue::ShortString(tag.to_string()), FieldValue::Boolean(no_wait)];
        let frame = self.method_frame(class::BASIC, basic::CANCEL, &kinds, &values)?;

        if no_wait {
            self.send(frame)?;
            self.inner.lock().await.consumers.remove(tag);
        } else {
            self.call(frame, class::BASIC, basic::CANCEL_OK).await?;
            self.inner.lock().await.consumers.remove(tag);
        }
        Ok(())
    }

    pub async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::LongLong, ArgKind::Bit];
        let values = [FieldValue::LongLongUInt(delivery_tag), FieldValue::Boolean(multiple)];
        let frame = self.method_frame(class::BASIC, basic::ACK, &kinds, &values)?;
        self.send(frame)
    }

    pub async fn basic_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::LongLong, ArgKind::Bit, ArgKind::Bit];
        let values = [FieldValue::LongLongUInt(delivery_tag), FieldValue::Boolean(multiple), FieldValue::Boolean(requeue)];
        let frame = self.method_frame(class::BASIC, basic::NACK, &kinds, &values)?;
        self.send(frame)
    }

    pub async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::LongLong, ArgKind::Bit];
        let values = [FieldValue::LongLongUInt(delivery_tag), FieldValue::Boolean(requeue)];
        let frame = self.method_frame(class::BASIC, basic::REJECT, &kinds, &values)?;
        self.send(frame)
    }

    pub async fn basic_recover(&self, requeue: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::Bit];
        let values = [FieldValue::Boolean(requeue)];
        let frame = self.method_frame(class::BASIC, basic::RECOVER, &kinds, &values)?;
        self.call(frame, class::BASIC, basic::RECOVER_OK).await?;
        Ok(())
    }

    /// Fetch a single message by polling, outside of any consumer
    /// subscription. Returns `None` on `Basic.GetEmpty`, otherwise the
    /// message paired with the broker's remaining-messages estimate.
    pub async fn basic_get(&self, queue: &str, no_ack: bool) -> AmqpResult<Option<(DeliveredMessage, u32)>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if inner.get_tracker.is_some() {
                return Err(AmqpError::invalid_argument("a Basic.Get is already in flight on this channel"));
            }
            inner.get_tracker = Some(tx);
        }

        let kinds = [ArgKind::ShortStr, ArgKind::Bit];
        let values = [FieldValue::ShortString(queue.to_string()), FieldValue::Boolean(no_ack)];
        let frame = self.method_frame(class::BASIC, basic::GET, &kinds, &values)?;
        self.send(frame)?;
        rx.await.map_err(|_| AmqpError::protocol("channel closed before Basic.Get completed"))?
    }

    pub async fn basic_recover_async(&self, requeue: bool) -> AmqpResult<()> {
        let kinds = [ArgKind::Bit];
        let values = [FieldValue::Boolean(requeue)];
        let frame = self.method_frame(class::BASIC, basic::RECOVER_ASYNC, &kinds, &values)?;
        self.send(frame)
    }

    pub async fn close(&self, code: u16, reply_text: &str) -> AmqpResult<()> {
        self.inner.lock().await.state = ChannelState::Closing;
        let kinds = [ArgKind::Short, ArgKind::ShortStr, ArgKind::Short, ArgKind::Short];
        let values = [
            FieldValue::ShortUInt(code),
            FieldValue::ShortString(reply_text.to_string()),
            FieldValue::ShortUInt(0),
            FieldValue::ShortUInt(0),
        ];
        let frame = self.method_frame(class::CHANNEL, chan::CLOSE, &kinds, &values)?;
        self.call(frame, class::CHANNEL, chan::CLOSE_OK).await?;
        self.inner.lock().await.state = ChannelState::Closed;
        Ok(())
    }

    /// Tear this channel down because the connection it lives on
    /// closed. Fails every in-flight future with `ConnectionClosed`
    /// rather than `ChannelClosed` so callers can tell the two apart.
    pub(crate) async fn fail_for_connection_close(&self, code: u16, reply_text: &str) {
        self.inner.lock().await.state = ChannelState::Closed;
        self.fail_all_trackers(AmqpError::connection_closed(code, reply_text.to_string())).await;
    }

    /// Dispatch a decoded method frame arriving on this channel. Called
    /// by the connection's read pump.
    pub(crate) async fn handle_method(&self, class_id: u16, method_id: u16, mut arguments: Bytes) -> AmqpResult<()> {
        if class_id == class::CHANNEL && method_id == chan::CLOSE {
            let kinds = [ArgKind::Short, ArgKind::ShortStr, ArgKind::Short, ArgKind::Short];
            let values = read_native_sequence(&mut arguments, &kinds)?;
            let (code, reply_text) = match (&values[0], &values[1]) {
                (FieldValue::ShortUInt(c), FieldValue::ShortString(t)) => (*c, t.clone()),
                _ => (0, String::new()),
            };
            self.send(Frame::Method {
                channel: self.id,
                class_id: class::CHANNEL,
                method_id: chan::CLOSE_OK,
                arguments: Bytes::new(),
            })?;
            self.fail_all_trackers(AmqpError::channel_closed(code, reply_text)).await;
            self.inner.lock().await.state = ChannelState::Closed;
            return Ok(());
        }

        if class_id == class::CHANNEL && method_id == chan::FLOW {
            let kinds = [ArgKind::Bit];
            let values = read_native_sequence(&mut arguments, &kinds)?;
            let active = matches!(values[0], FieldValue::Boolean(true));
            self.inner.lock().await.flow_active = active;
            let reply = self.method_frame(class::CHANNEL, chan::FLOW_OK, &kinds, &values)?;
            return self.send(reply);
        }

        if class_id == class::BASIC && method_id == basic::DELIVER {
            return self.start_delivery(&mut arguments, DeliveryKind::Consumer).await;
        }
        if class_id == class::BASIC && method_id == basic::GET_OK {
            return self.start_delivery(&mut arguments, DeliveryKind::Get).await;
        }
        if class_id == class::BASIC && method_id == basic::GET_EMPTY {
            if let Some(tx) = self.inner.lock().await.get_tracker.take() {
                let _ = tx.send(Ok(None));
            }
            return Ok(());
        }
        if class_id == class::BASIC && (method_id == basic::ACK || method_id == basic::NACK) {
            return self.handle_confirm(method_id, &mut arguments).await;
        }
        if class_id == class::BASIC && method_id == basic::RETURN {
            return self.start_delivery(&mut arguments, DeliveryKind::Return).await;
        }

        let values = match crate::spec_tables::method_arg_kinds(class_id, method_id) {
            Some(kinds) => read_native_sequence(&mut arguments, kinds)?,
            None => {
                log::debug!("dropping unrecognized method ({}, {}) on channel {}", class_id, method_id, self.id);
                return Ok(());
            }
        };
        self.complete_tracker(class_id, method_id, Ok(values)).await;
        Ok(())
    }

    async fn handle_confirm(&self, method_id: u16, arguments: &mut Bytes) -> AmqpResult<()> {
        let kinds = [ArgKind::LongLong, ArgKind::Bit];
        let values = read_native_sequence(arguments, &kinds)?;
        let delivery_tag = match values[0] {
            FieldValue::LongLongUInt(v) => v,
            _ => 0,
        };
        let multiple = matches!(values[1], FieldValue::Boolean(true));
        let inner = self.inner.lock().await;
        if let Some(tx) = &inner.confirms {
            let _ = tx.try_send(ConfirmEvent { delivery_tag, multiple, acked: method_id == basic::ACK });
        }
        Ok(())
    }

    async fn start_delivery(&self, arguments: &mut Bytes, kind: DeliveryKind) -> AmqpResult<()> {
        let pending = if kind == DeliveryKind::Get {
            let kinds = [ArgKind::LongLong, ArgKind::Bit, ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::Long];
            let values = read_native_sequence(arguments, &kinds)?;
            PendingDelivery {
                kind,
                consumer_tag: None,
                delivery_tag: as_u64(&values[0]),
                redelivered: as_bool(&values[1]),
                exchange: as_short_string(&values[2]),
                routing_key: as_short_string(&values[3]),
                message_count: Some(as_u32(&values[4])),
                content_size: None,
                properties: None,
                payload: BytesMut::new(),
            }
        } else if kind == DeliveryKind::Return {
            let kinds = [ArgKind::Short, ArgKind::ShortStr, ArgKind::ShortStr, ArgKind::ShortStr];
            let values = read_native_sequence(arguments, &kinds)?;
            PendingDelivery {
                kind,
                consumer_tag: None,
                delivery_tag: 0,
                redelivered: false,
                exchange: as_short_string(&values[2]),
                routing_key: as_short_string(&values[3]),
                message_count: None,
                content_size: None,
                properties: None,
                payload: BytesMut::new(),
            }
        } else {
            let kinds = [ArgKind::ShortStr, ArgKind::LongLong, ArgKind::Bit, ArgKind::ShortStr, ArgKind::ShortStr];
            let values = read_native_sequence(arguments, &kinds)?;
            PendingDelivery {
                kind,
                consumer_tag: Some(as_short_string(&values[0])),
                delivery_tag: as_u64(&values[1]),
                redelivered: as_bool(&values[2]),
                exchange: as_short_string(&values[3]),
                routing_key: as_short_string(&values[4]),
                message_count: None,
                content_size: None,
                properties: None,
                payload: BytesMut::new(),
            }
        };
        self.inner.lock().await.pending = Some(pending);
        Ok(())
    }

    /// Dispatch a decoded content-header frame. Must follow a
    /// `Deliver`/`GetOk` method frame per the protocol's framing rule.
    pub(crate) async fn handle_header(&self, content_size: u64, mut properties: Bytes) -> AmqpResult<()> {
        if content_size > MAX_CONTENT_SIZE {
            return self.close(500, "Message too large").await;
        }
        if properties.len() < 2 {
            return Err(AmqpError::protocol("content header shorter than its flags field"));
        }
        let flags = u16::from_be_bytes([properties[0], properties[1]]);
        let mut body = properties.split_off(2);
        let decoded = BasicProperties::decode(flags, &mut body)?;

        let mut inner = self.inner.lock().await;
        let pending = inner.pending.as_mut().ok_or_else(|| AmqpError::protocol("content header with no pending delivery"))?;
        pending.content_size = Some(content_size);
        pending.properties = Some(decoded);
        if content_size == 0 {
            let pending = inner.pending.take().unwrap();
            drop(inner);
            self.complete_delivery(pending).await;
        }
        Ok(())
    }

    /// Dispatch a decoded body frame, completing the delivery once the
    /// accumulator has consumed exactly `content_size` bytes.
    pub(crate) async fn handle_body(&self, payload: Bytes) -> AmqpResult<()> {
        let mut inner = self.inner.lock().await;
        let pending = inner.pending.as_mut().ok_or_else(|| AmqpError::protocol("body frame with no pending delivery"))?;
        pending.payload.extend_from_slice(&payload);

        let expected = pending.content_size.ok_or_else(|| AmqpError::protocol("body frame before content header"))?;
        if (pending.payload.len() as u64) < expected {
            return Ok(());
        }

        let pending = inner.pending.take().unwrap();
        drop(inner);
        self.complete_delivery(pending).await;
        Ok(())
    }

    async fn complete_delivery(&self, pending: PendingDelivery) {
        let properties = pending.properties.unwrap_or_default();
        let payload = pending.payload.freeze();

        if pending.kind == DeliveryKind::Return {
            log::warn!(
                "message returned by broker: exchange='{}' routing_key='{}' ({} bytes)",
                pending.exchange,
                pending.routing_key,
                payload.len()
            );
            return;
        }

        if pending.kind == DeliveryKind::Get {
            let message_count = pending.message_count.unwrap_or(0);
            let message = DeliveredMessage {
                consumer_tag: None,
                delivery_tag: pending.delivery_tag,
                redelivered: pending.redelivered,
                exchange: pending.exchange,
                routing_key: pending.routing_key,
                properties,
                payload,
            };
            if let Some(tx) = self.inner.lock().await.get_tracker.take() {
                let _ = tx.send(Ok(Some((message, message_count))));
            }
            return;
        }

        let tag = pending.consumer_tag.clone().unwrap_or_default();
        let message = DeliveredMessage {
            consumer_tag: pending.consumer_tag,
            delivery_tag: pending.delivery_tag,
            redelivered: pending.redelivered,
            exchange: pending.exchange,
            routing_key: pending.routing_key,
            properties,
            payload,
        };

        let sender = self.inner.lock().await.consumers.get(&tag).cloned();
        match sender {
            Some(sender) => {
                if sender.send(message).await.is_err() {
                    log::debug!("consumer '{}' receiver dropped; discarding delivery", tag);
                }
            }
            None => log::debug!("delivery for unknown consumer tag '{}' discarded", tag),
        }
    }

    async fn complete_tracker(&self, class_id: u16, method_id: u16, result: AmqpResult<Vec<FieldValue>>) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.trackers.iter().position(|t| t.class_id == class_id && t.method_id == method_id) {
            let tracker = inner.trackers.remove(pos);
            let _ = tracker.sink.send(result);
        } else {
            log::debug!("no tracker for reply ({}, {}); dropping", class_id, method_id);
        }
    }

    async fn fail_all_trackers(&self, error: AmqpError) {
        let mut inner = self.inner.lock().await;
        for tracker in inner.trackers.drain(..) {
            let _ = tracker.sink.send(Err(clone_amqp_error(&error)));
        }
        if let Some(tx) = inner.get_tracker.take() {
            let _ = tx.send(Err(clone_amqp_error(&error)));
        }
    }
}

fn clone_amqp_error(error: &AmqpError) -> AmqpError {
    match error {
        AmqpError::ChannelClosed { code, reply_text } => AmqpError::channel_closed(*code, reply_text.clone()),
        AmqpError::ConnectionClosed { code, reply_text } => AmqpError::connection_closed(*code, reply_text.clone()),
        other => AmqpError::protocol(other.to_string()),
    }
}

fn as_u64(v: &FieldValue) -> u64 {
    match v {
        FieldValue::LongLongUInt(v) => *v,
        _ => 0,
    }
}

fn as_u32(v: &FieldValue) -> u32 {
    match v {
        FieldValue::LongUInt(v) => *v,
        _ => 0,
    }
}

fn as_bool(v: &FieldValue) -> bool {
    matches!(v, FieldValue::Boolean(true))
}

fn as_short_string(v: &FieldValue) -> String {
    match v {
        FieldValue::ShortString(s) => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_channel() -> (Channel, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Channel::new(1, tx, 131_072), rx)
    }

    #[tokio::test]
    async fn publish_emits_method_header_and_body_frames() {
        let (channel, mut rx) = test_channel();
        let message = OutboundMessage::new("ex", "rk", Bytes::from_static(b"hello"));
        channel.basic_publish(message).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Frame::Method { .. })));
        assert!(matches!(rx.recv().await, Some(Frame::Header { .. })));
        assert!(matches!(rx.recv().await, Some(Frame::Body { .. })));
    }

    #[tokio::test]
    async fn basic_consume_rejects_duplicate_tag_locally() {
        let (channel, _rx) = test_channel();
        channel.inner.lock().await.consumers.insert("tag-1".to_string(), mpsc::channel(1).0);
        let err = channel.basic_consume("q", "tag-1", false, false).await.unwrap_err();
        assert!(matches!(err, AmqpError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn server_close_fails_in_flight_trackers() {
        let (channel, mut rx) = test_channel();
        let channel_for_call = channel.clone();
        let call = tokio::spawn(async move {
            channel_for_call.declare_exchange("ex", "direct", false, false).await
        });
        // drain the Exchange.Declare frame the call sent
        let _ = rx.recv().await;

        let mut close_args = BytesMut::new();
        write_native_sequence(
            &mut close_args,
            &[ArgKind::Short, ArgKind::ShortStr, ArgKind::Short, ArgKind::Short],
            &[
                FieldValue::ShortUInt(320),
                FieldValue::ShortString("CONNECTION_FORCED".to_string()),
                FieldValue::ShortUInt(0),
                FieldValue::ShortUInt(0),
            ],
        )
        .unwrap();
        channel.handle_method(class::CHANNEL, chan::CLOSE, close_args.freeze()).await.unwrap();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(AmqpError::ChannelClosed { code: 320, .. })));
    }

    #[tokio::test]
    async fn deliver_then_header_then_body_dispatches_to_consumer() {
        let (channel, mut rx) = test_channel();
        let (consume_tx, mut consume_rx) = mpsc::channel(8);
        channel.inner.lock().await.consumers.insert("ctag".to_string(), consume_tx);

        let mut deliver_args = BytesMut::new();
        write_native_sequence(
            &mut deliver_args,
            &[ArgKind::ShortStr, ArgKind::LongLong, ArgKind::Bit, ArgKind::ShortStr, ArgKind::ShortStr],
            &[
                FieldValue::ShortString("ctag".to_string()),
                FieldValue::LongLongUInt(1),
                FieldValue::Boolean(false),
                FieldValue::ShortString("ex".to_string()),
                FieldValue::ShortString("rk".to_string()),
            ],
        )
        .unwrap();
        channel.handle_method(class::BASIC, basic::DELIVER, deliver_args.freeze()).await.unwrap();

        let props = BasicProperties::default();
        let (flags, body) = props.encode().unwrap();
        let mut properties = BytesMut::new();
        properties.extend_from_slice(&flags.to_be_bytes());
        properties.extend_from_slice(&body);
        channel.handle_header(3, properties.freeze()).await.unwrap();
        channel.handle_body(Bytes::from_static(b"hi!")).await.unwrap();

        let message = consume_rx.recv().await.unwrap();
        assert_eq!(message.delivery_tag, 1);
        assert_eq!(&message.payload[..], b"hi!");
        let _ = rx.try_recv();
    }
}
