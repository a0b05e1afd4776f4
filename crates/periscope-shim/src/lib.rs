// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # periscope-shim
//!
//! Instrumentation shims: the wrappers a library's instrumentation uses to
//! record what the monitored application does with that library.
//!
//! A monitored library exposes its entry points as a [`Target`], a table of
//! named [`Value`]s. A [`Shim`] replaces selected [`Function`]s with
//! interceptors that keep the original's name, arity and properties, record
//! a segment for each call, and keep callbacks and futures in the right
//! transaction context.
//!
//! Specializations add the conventions of one kind of library:
//!
//! - [`DatastoreShim`] for database clients
//! - [`MessagingShim`] for message brokers
//! - [`PromiseShim`] for continuation chains
//! - [`TransactionShim`] for libraries that delimit their own units of work
//! - [`WebFrameworkShim`] for routers
//! - [`CompositeShim`] for libraries that are several of the above
//!
//! [`create_shim`] picks one from a category tag, and [`ShimFactory`] keeps
//! one shim per loaded library.
//!
//! Instrumentation never changes what monitored code observes: a failing
//! namer or extractor becomes a diagnostic and the original call proceeds.
//!
//! ## Example
//!
//! ```rust
//! use periscope_core::{Agent, AgentConfig, AgentContext, Context, TransactionKind, context};
//! use periscope_shim::{Function, RecordSpec, Shim, Target, Value};
//!
//! let agent = Agent::new(AgentConfig::default());
//! let shim = Shim::new(agent.clone(), "fs", "fs");
//! let fs = Target::new("fs").with("read", Function::sync("read", 1, |_| Ok(Value::from("data"))));
//! shim.wrap(&fs, "read", &RecordSpec::named("Filesystem/read"));
//!
//! let tx = agent.start_transaction(TransactionKind::Background);
//! {
//!     let _guard = context::enter(agent.id(), Context::from_segment(tx.root()));
//!     let _ = fs.call_method("read", vec!["/etc/hosts".into()]);
//! }
//! agent.end_transaction(&tx);
//! assert_eq!(tx.trace().segments_named("Filesystem/read").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bound;
pub mod category;
pub mod composite;
pub mod datastore;
pub mod factory;
pub mod function;
pub mod messaging;
pub mod promise;
pub mod props;
pub mod shim;
pub mod spec;
pub mod target;
pub mod transaction;
pub mod value;
pub mod webframework;

pub use bound::Bound;
pub use category::Category;
pub use composite::CompositeShim;
pub use datastore::{DatastoreShim, QueryDescriptor, normalize_query};
pub use factory::{InstrumentationShim, ShimFactory, create_shim, create_shim_for};
pub use function::{Function, FunctionId, WrapKind};
pub use messaging::{DestinationType, Direction, MessageDescriptor, MessagingShim};
pub use promise::PromiseShim;
pub use props::Shape;
pub use shim::{Shim, ShimId};
pub use spec::{CallbackPosition, Namer, Naming, RecordSpec, Selector};
pub use target::{Target, TargetId};
pub use transaction::{TransactionHandle, TransactionShim};
pub use value::{ArgRef, ArgView, Call, CallError, CallResult, Outcome, Value};
pub use webframework::{
    DispatchInfo, MiddlewareKind, MiddlewareSpec, MountSpec, ResponseEvent, ResponseHook,
    RouteParser, WebFrameworkShim,
};
