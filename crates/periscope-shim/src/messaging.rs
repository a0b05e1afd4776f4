//! Messaging specialization.
//!
//! Producer and pull-consumer calls become segments named
//! `MessageBroker/{library}/{type}/{Produce|Consume}/Named/{destination}`.
//! Subscription-style consumers are different: the broker client calls the
//! registered handler over and over from its own delivery loop, so every
//! delivery gets its own `Message` transaction.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use periscope_core::{Context, Result, ShimError, Transaction, TransactionKind, context};
use serde::{Deserialize, Serialize};

use crate::bound::Bound;
use crate::function::{Function, WrapKind};
use crate::shim::{Interception, Shim};
use crate::spec::{CallbackPosition, Selector};
use crate::target::Target;
use crate::value::{ArgView, Call, Outcome, Value};

const UNKNOWN_LIBRARY: &str = "Unknown";

/// Kind of broker destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationType {
    /// An exchange (AMQP).
    Exchange,
    /// A named queue.
    Queue,
    /// A named topic.
    Topic,
    /// A broker-named temporary queue.
    TempQueue,
    /// A broker-named temporary topic.
    TempTopic,
}

impl DestinationType {
    /// Returns the name segment used in metric names.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Exchange => "Exchange",
            Self::Queue | Self::TempQueue => "Queue",
            Self::Topic | Self::TempTopic => "Topic",
        }
    }

    /// Returns true for broker-named destinations.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::TempQueue | Self::TempTopic)
    }
}

/// Direction of a message operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Publishing.
    Produce,
    /// Receiving.
    Consume,
}

impl Direction {
    const fn label(self) -> &'static str {
        match self {
            Self::Produce => "Produce",
            Self::Consume => "Consume",
        }
    }
}

/// Where a message goes or comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Destination kind.
    pub destination_type: DestinationType,
    /// Destination name; ignored for temporary destinations.
    pub destination: Option<String>,
    /// AMQP routing key.
    pub routing_key: Option<String>,
    /// Completion callback (produce/consume) or consumer (subscribe).
    pub callback: Option<CallbackPosition>,
}

impl MessageDescriptor {
    /// Describes a named destination.
    #[must_use]
    pub fn new(destination_type: DestinationType, destination: impl Into<String>) -> Self {
        Self {
            destination_type,
            destination: Some(destination.into()),
            routing_key: None,
            callback: None,
        }
    }

    /// Describes a temporary destination.
    #[must_use]
    pub const fn temporary(destination_type: DestinationType) -> Self {
        Self {
            destination_type,
            destination: None,
            routing_key: None,
            callback: None,
        }
    }

    /// Sets the routing key.
    #[must_use]
    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Sets the callback position.
    #[must_use]
    pub const fn callback(mut self, position: CallbackPosition) -> Self {
        self.callback = Some(position);
        self
    }

    fn destination_path(&self) -> String {
        match (&self.destination, self.destination_type.is_temporary()) {
            (Some(name), false) => format!("{}/Named/{name}", self.destination_type.label()),
            _ => format!("{}/Temp", self.destination_type.label()),
        }
    }

    /// Returns the segment name for a produce or consume call.
    #[must_use]
    pub fn segment_name(&self, library: &str, direction: Direction) -> String {
        let path = self.destination_path();
        let (kind, rest) = path.split_once('/').unwrap_or((path.as_str(), ""));
        format!("MessageBroker/{library}/{kind}/{}/{rest}", direction.label())
    }

    /// Returns the transaction name for one subscribed delivery.
    #[must_use]
    pub fn transaction_name(&self, library: &str) -> String {
        format!(
            "{}/{library}/{}",
            TransactionKind::Message.prefix(),
            self.destination_path()
        )
    }

    fn interception(&self, library: &str, direction: Direction, args: &ArgView<'_>) -> Interception {
        let mut plan = Interception::named(self.segment_name(library, direction));
        plan.attributes
            .insert("destination_type".into(), self.destination_type.label().into());
        if let Some(destination) = &self.destination {
            plan.attributes
                .insert("destination".into(), destination.clone().into());
        }
        if let Some(key) = &self.routing_key {
            plan.attributes.insert("routing_key".into(), key.clone().into());
        }
        plan.callback = self.callback.and_then(|p| p.resolve(args));
        plan
    }

    fn annotate(&self, transaction: &Transaction) {
        if let Some(destination) = &self.destination {
            transaction.set_attribute("message.destination", destination.clone());
        }
        if let Some(key) = &self.routing_key {
            transaction.set_attribute("message.routingKey", key.clone());
        }
    }
}

/// Shim for message broker clients.
#[derive(Clone, Debug)]
pub struct MessagingShim {
    shim: Shim,
    library: Arc<RwLock<String>>,
}

impl MessagingShim {
    pub(crate) fn new(shim: Shim) -> Self {
        Self {
            shim,
            library: Arc::new(RwLock::new(UNKNOWN_LIBRARY.to_string())),
        }
    }

    /// Names the broker library (`RabbitMQ`, `Kafka`...).
    pub fn set_library(&self, library: impl Into<String>) {
        *self.library.write() = library.into();
    }

    /// Returns the broker library.
    #[must_use]
    pub fn library(&self) -> String {
        self.library.read().clone()
    }

    /// Wraps publishing methods.
    pub fn record_produce<E>(&self, target: &Target, selector: impl Into<Selector>, extractor: E) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<MessageDescriptor> + Send + Sync + 'static,
    {
        self.record(target, selector, Direction::Produce, extractor)
    }

    /// Wraps pull-style receive methods. Each call is its own segment.
    pub fn record_consume<E>(&self, target: &Target, selector: impl Into<Selector>, extractor: E) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<MessageDescriptor> + Send + Sync + 'static,
    {
        self.record(target, selector, Direction::Consume, extractor)
    }

    fn record<E>(
        &self,
        target: &Target,
        selector: impl Into<Selector>,
        direction: Direction,
        extractor: E,
    ) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<MessageDescriptor> + Send + Sync + 'static,
    {
        let extractor = Arc::new(extractor);
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            let library = Arc::clone(&self.library);
            let extractor = Arc::clone(&extractor);
            move |call| {
                shim.intercept_call(&original, call, |args| {
                    let descriptor = extractor(args)?;
                    Ok(descriptor.interception(&library.read(), direction, args))
                })
            }
        })
    }

    /// Wraps subscription methods that register a consumer.
    ///
    /// The descriptor's `callback` locates the consumer among the
    /// arguments. Each delivery to the consumer starts a new `Message`
    /// transaction, which ends when the consumer returns or its future
    /// settles. The registering caller's context is never visible to
    /// deliveries.
    pub fn record_subscribed_consume<E>(
        &self,
        target: &Target,
        selector: impl Into<Selector>,
        extractor: E,
    ) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<MessageDescriptor> + Send + Sync + 'static,
    {
        let extractor = Arc::new(extractor);
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            let library = Arc::clone(&self.library);
            let extractor = Arc::clone(&extractor);
            move |mut call: Call| {
                let plan = shim.guard("message subscription", || {
                    let args = call.view();
                    let descriptor = extractor(&args)?;
                    let index = descriptor
                        .callback
                        .and_then(|p| p.resolve(&args))
                        .ok_or_else(|| ShimError::misuse("subscription has no consumer callback"))?;
                    Ok((descriptor, index))
                });
                if let Some((descriptor, index)) = plan {
                    if let Some(Value::Function(consumer)) = call.args.get(index).cloned() {
                        let name = descriptor.transaction_name(&library.read());
                        call.args[index] =
                            Value::Function(deliveries(&shim, &consumer, descriptor, name));
                    }
                }
                original.call(call)
            }
        })
    }
}

/// Wraps a consumer so each invocation runs in a fresh transaction.
fn deliveries(shim: &Shim, consumer: &Function, descriptor: MessageDescriptor, name: String) -> Function {
    let agent = Arc::clone(shim.agent());
    let module = shim.module_arc();
    let handler = consumer.clone();
    Function::wrap(consumer, shim.id(), WrapKind::Bound, move |call| {
        let transaction = agent.start_transaction(TransactionKind::Message);
        transaction.set_name(name.clone());
        descriptor.annotate(&transaction);
        let delivery = Context::from_segment(transaction.root());

        let outcome = {
            let _guard = context::enter(agent.id(), delivery.clone());
            handler.call(call)
        };
        match outcome {
            Outcome::Ready(result) => {
                agent.end_transaction(&transaction);
                Outcome::Ready(result)
            }
            Outcome::Pending(future) => {
                let finisher = Arc::clone(&agent);
                Outcome::Pending(Box::pin(
                    Bound::new(future, Arc::clone(&agent), delivery, Arc::clone(&module))
                        .on_settle(move |_| {
                            finisher.end_transaction(&transaction);
                        }),
                ))
            }
        }
    })
}

impl Deref for MessagingShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}
