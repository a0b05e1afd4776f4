//! Mock message broker channel with publish, pull and push consumption.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::ShimError;
use periscope_shim::{
    CallbackPosition, DestinationType, Function, MessageDescriptor, MessagingShim, Target, Value,
};

/// Library name reported by [`instrument`].
pub const LIBRARY: &str = "MockMQ";

type Queues = Arc<Mutex<HashMap<String, VecDeque<serde_json::Value>>>>;
type Consumers = Arc<Mutex<HashMap<String, Vec<Function>>>>;

/// A direct-exchange broker: messages are routed to the queue named by
/// their routing key.
#[derive(Debug, Clone)]
pub struct MockBroker {
    target: Target,
    queues: Queues,
    consumers: Consumers,
}

impl MockBroker {
    /// Creates a channel.
    ///
    /// - `publish(exchange, routingKey, body)`
    /// - `get(queue, callback)` calls back `(null, message | null)`
    /// - `consume(queue, consumer)` registers a push consumer; deliveries
    ///   happen on [`deliver`](Self::deliver)
    #[must_use]
    pub fn new() -> Self {
        let queues: Queues = Arc::new(Mutex::new(HashMap::new()));
        let consumers: Consumers = Arc::new(Mutex::new(HashMap::new()));

        let inbox = Arc::clone(&queues);
        let publish = Function::sync("publish", 3, move |call| {
            let key = call.arg(1).and_then(Value::as_str).unwrap_or_default().to_string();
            let body = call.arg(2).and_then(Value::as_data).cloned().unwrap_or_default();
            inbox.lock().entry(key).or_default().push_back(body);
            Ok(Value::from(true))
        });

        let outbox = Arc::clone(&queues);
        let get = Function::sync("get", 2, move |call| {
            let queue = call.arg(0).and_then(Value::as_str).unwrap_or_default();
            let message = outbox
                .lock()
                .get_mut(queue)
                .and_then(VecDeque::pop_front)
                .unwrap_or(serde_json::Value::Null);
            if let Some(Value::Function(callback)) = call.arg(1) {
                let _ = callback.invoke(vec![serde_json::Value::Null.into(), message.into()]);
            }
            Ok(Value::Undefined)
        });

        let registry = Arc::clone(&consumers);
        let consume = Function::sync("consume", 2, move |call| {
            let queue = call.arg(0).and_then(Value::as_str).unwrap_or_default().to_string();
            if let Some(Value::Function(consumer)) = call.arg(1) {
                registry.lock().entry(queue).or_default().push(consumer.clone());
            }
            Ok(Value::Undefined)
        });

        Self {
            target: Target::new("Channel")
                .with("publish", publish)
                .with("get", get)
                .with("consume", consume),
            queues,
            consumers,
        }
    }

    /// Returns the channel object.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the number of messages waiting in `queue`.
    #[must_use]
    pub fn depth(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Pushes every waiting message of `queue` to its consumers, as the
    /// broker's own I/O thread would. Returns the number of deliveries.
    pub fn deliver(&self, queue: &str) -> usize {
        let consumers = self.consumers.lock().get(queue).cloned().unwrap_or_default();
        if consumers.is_empty() {
            return 0;
        }
        let messages: Vec<serde_json::Value> = self
            .queues
            .lock()
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        let mut delivered = 0;
        for (i, message) in messages.into_iter().enumerate() {
            let consumer = &consumers[i % consumers.len()];
            let _ = consumer.invoke(vec![message.into()]);
            delivered += 1;
        }
        delivered
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Instruments a channel the way a messaging script would.
pub fn instrument(shim: &MessagingShim, channel: &Target) {
    shim.set_library(LIBRARY);
    shim.record_produce(channel, "publish", |args| {
        let exchange = args
            .str(0)
            .ok_or_else(|| ShimError::instrumentation("publish without exchange"))?;
        let mut descriptor = MessageDescriptor::new(DestinationType::Exchange, exchange);
        if let Some(key) = args.str(1) {
            descriptor = descriptor.routing_key(key);
        }
        Ok(descriptor)
    });
    shim.record_consume(channel, "get", |args| {
        let queue = args
            .str(0)
            .ok_or_else(|| ShimError::instrumentation("get without queue"))?;
        Ok(MessageDescriptor::new(DestinationType::Queue, queue).callback(CallbackPosition::Last))
    });
    shim.record_subscribed_consume(channel, "consume", |args| {
        let queue = args
            .str(0)
            .ok_or_else(|| ShimError::instrumentation("consume without queue"))?;
        Ok(MessageDescriptor::new(DestinationType::Queue, queue).callback(CallbackPosition::Index(1)))
    });
}
