//! Shim construction from a declared category.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::AgentContext;

use crate::category::Category;
use crate::composite::CompositeShim;
use crate::datastore::DatastoreShim;
use crate::messaging::MessagingShim;
use crate::promise::PromiseShim;
use crate::shim::Shim;
use crate::transaction::TransactionShim;
use crate::webframework::WebFrameworkShim;

// =============================================================================
// InstrumentationShim
// =============================================================================

/// A shim of whichever specialization its category selects.
#[derive(Clone, Debug)]
pub enum InstrumentationShim {
    /// Generic interception only.
    Generic(Shim),
    /// Every specialization over one shim.
    Composite(CompositeShim),
    /// Data access.
    Datastore(DatastoreShim),
    /// Message brokers.
    Messaging(MessagingShim),
    /// Promise chains.
    Promise(PromiseShim),
    /// Explicit transaction boundaries.
    Transaction(TransactionShim),
    /// Web routing.
    WebFramework(WebFrameworkShim),
}

impl InstrumentationShim {
    /// Returns the data-access view.
    ///
    /// Asking a shim for a view its category does not provide records a
    /// misuse and returns `None`.
    pub fn as_datastore(&self) -> Option<&DatastoreShim> {
        match self {
            Self::Datastore(shim) => Some(shim),
            Self::Composite(shim) => Some(shim.datastore()),
            _ => self.mismatch(Category::Datastore),
        }
    }

    /// Returns the messaging view.
    pub fn as_messaging(&self) -> Option<&MessagingShim> {
        match self {
            Self::Messaging(shim) => Some(shim),
            Self::Composite(shim) => Some(shim.messaging()),
            _ => self.mismatch(Category::Messaging),
        }
    }

    /// Returns the promise-chain view.
    pub fn as_promise(&self) -> Option<&PromiseShim> {
        match self {
            Self::Promise(shim) => Some(shim),
            Self::Composite(shim) => Some(shim.promise()),
            _ => self.mismatch(Category::Promise),
        }
    }

    /// Returns the transaction-boundary view.
    pub fn as_transaction(&self) -> Option<&TransactionShim> {
        match self {
            Self::Transaction(shim) => Some(shim),
            Self::Composite(shim) => Some(shim.transaction()),
            _ => self.mismatch(Category::Transaction),
        }
    }

    /// Returns the web-routing view.
    pub fn as_web_framework(&self) -> Option<&WebFrameworkShim> {
        match self {
            Self::WebFramework(shim) => Some(shim),
            Self::Composite(shim) => Some(shim.web_framework()),
            _ => self.mismatch(Category::WebFramework),
        }
    }

    /// Returns the composite shim.
    pub fn as_composite(&self) -> Option<&CompositeShim> {
        match self {
            Self::Composite(shim) => Some(shim),
            _ => self.mismatch(Category::Composite),
        }
    }

    fn mismatch<T>(&self, wanted: Category) -> Option<T> {
        self.misuse(format!(
            "{} shim used as a {wanted} shim",
            self.category()
        ));
        None
    }
}

impl Deref for InstrumentationShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        match self {
            Self::Generic(shim) => shim,
            Self::Composite(shim) => shim,
            Self::Datastore(shim) => shim,
            Self::Messaging(shim) => shim,
            Self::Promise(shim) => shim,
            Self::Transaction(shim) => shim,
            Self::WebFramework(shim) => shim,
        }
    }
}

// =============================================================================
// create_shim - Factory functions
// =============================================================================

/// Creates the shim for a declared category tag.
///
/// Unknown tags fall back to the generic shim.
#[must_use]
pub fn create_shim(
    tag: &str,
    agent: Arc<dyn AgentContext>,
    module_name: &str,
    resolved_name: &str,
) -> InstrumentationShim {
    create_shim_for(Category::from_tag(tag), agent, module_name, resolved_name)
}

/// Creates the shim for a category.
#[must_use]
pub fn create_shim_for(
    category: Category,
    agent: Arc<dyn AgentContext>,
    module_name: &str,
    resolved_name: &str,
) -> InstrumentationShim {
    let shim = Shim::for_category(category, agent, module_name, resolved_name);
    tracing::debug!(
        module = module_name,
        resolved = resolved_name,
        category = %category,
        "created shim"
    );
    match category {
        Category::Generic => InstrumentationShim::Generic(shim),
        Category::Composite => InstrumentationShim::Composite(CompositeShim::new(shim)),
        Category::Datastore => InstrumentationShim::Datastore(DatastoreShim::new(shim)),
        Category::Messaging => InstrumentationShim::Messaging(MessagingShim::new(shim)),
        Category::Promise => InstrumentationShim::Promise(PromiseShim::new(shim)),
        Category::Transaction => InstrumentationShim::Transaction(TransactionShim::new(shim)),
        Category::WebFramework => InstrumentationShim::WebFramework(WebFrameworkShim::new(shim)),
    }
}

// =============================================================================
// ShimFactory
// =============================================================================

/// Hands out one shim per loaded library.
///
/// Shims are keyed by resolved name, so loading the same file twice reuses
/// the shim and its wrap record.
pub struct ShimFactory {
    agent: Arc<dyn AgentContext>,
    loaded: Mutex<HashMap<String, InstrumentationShim>>,
}

impl ShimFactory {
    /// Creates a factory bound to `agent`.
    #[must_use]
    pub fn new(agent: Arc<dyn AgentContext>) -> Self {
        Self {
            agent,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shim for `resolved_name`, creating it on first load.
    ///
    /// The category is fixed by the first load.
    pub fn shim_for(&self, tag: &str, module_name: &str, resolved_name: &str) -> InstrumentationShim {
        let mut loaded = self.loaded.lock();
        if let Some(shim) = loaded.get(resolved_name) {
            return shim.clone();
        }
        let shim = create_shim(tag, Arc::clone(&self.agent), module_name, resolved_name);
        loaded.insert(resolved_name.to_string(), shim.clone());
        shim
    }

    /// Returns the shim already created for `resolved_name`.
    #[must_use]
    pub fn get(&self, resolved_name: &str) -> Option<InstrumentationShim> {
        self.loaded.lock().get(resolved_name).cloned()
    }

    /// Returns how many libraries have shims.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().len()
    }
}

impl std::fmt::Debug for ShimFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimFactory")
            .field("agent", &self.agent.id())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}
