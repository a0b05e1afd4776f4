//! Composite specialization for libraries that span several categories.
//!
//! All views share one base [`Shim`]: the same agent, names, enablement
//! and wrap record. A path wrapped through one view is therefore seen as
//! wrapped by every other view.

use std::ops::Deref;

use crate::datastore::DatastoreShim;
use crate::messaging::MessagingShim;
use crate::promise::PromiseShim;
use crate::shim::Shim;
use crate::transaction::TransactionShim;
use crate::webframework::WebFrameworkShim;

/// Shim exposing every specialization over one base shim.
#[derive(Clone, Debug)]
pub struct CompositeShim {
    shim: Shim,
    datastore: DatastoreShim,
    messaging: MessagingShim,
    promise: PromiseShim,
    transaction: TransactionShim,
    web: WebFrameworkShim,
}

impl CompositeShim {
    pub(crate) fn new(shim: Shim) -> Self {
        Self {
            datastore: DatastoreShim::new(shim.clone()),
            messaging: MessagingShim::new(shim.clone()),
            promise: PromiseShim::new(shim.clone()),
            transaction: TransactionShim::new(shim.clone()),
            web: WebFrameworkShim::new(shim.clone()),
            shim,
        }
    }

    /// Data-access view.
    #[must_use]
    pub const fn datastore(&self) -> &DatastoreShim {
        &self.datastore
    }

    /// Messaging view.
    #[must_use]
    pub const fn messaging(&self) -> &MessagingShim {
        &self.messaging
    }

    /// Promise-chain view.
    #[must_use]
    pub const fn promise(&self) -> &PromiseShim {
        &self.promise
    }

    /// Transaction-boundary view.
    #[must_use]
    pub const fn transaction(&self) -> &TransactionShim {
        &self.transaction
    }

    /// Web-routing view.
    #[must_use]
    pub const fn web_framework(&self) -> &WebFrameworkShim {
        &self.web
    }
}

impl Deref for CompositeShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}
