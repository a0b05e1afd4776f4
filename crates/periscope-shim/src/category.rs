//! Library categories and the tag registry.
//!
//! Instrumentation scripts declare the category of the library they wrap as
//! a string tag. The registry maps tags (and their aliases) to a
//! [`Category`]; unknown tags resolve to [`Category::Generic`].

use serde::{Deserialize, Serialize};

/// Kind of library a shim was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Generic call interception.
    Generic,
    /// Several categories on one library.
    Composite,
    /// Database clients.
    Datastore,
    /// Message broker clients.
    Messaging,
    /// Promise/continuation libraries.
    Promise,
    /// Libraries that delimit their own units of work.
    Transaction,
    /// Web routing frameworks.
    WebFramework,
}

/// Tag registry, canonical names first.
const REGISTRY: &[(&str, Category)] = &[
    ("generic", Category::Generic),
    ("composite", Category::Composite),
    ("datastore", Category::Datastore),
    ("messaging", Category::Messaging),
    ("promise", Category::Promise),
    ("transaction", Category::Transaction),
    ("web-framework", Category::WebFramework),
    ("conglomerate", Category::Composite),
    ("data-access", Category::Datastore),
    ("message", Category::Messaging),
    ("promise-chain", Category::Promise),
    ("transaction-boundary", Category::Transaction),
    ("web-routing", Category::WebFramework),
    ("web_framework", Category::WebFramework),
];

impl Category {
    /// All categories.
    pub const ALL: [Self; 7] = [
        Self::Generic,
        Self::Composite,
        Self::Datastore,
        Self::Messaging,
        Self::Promise,
        Self::Transaction,
        Self::WebFramework,
    ];

    /// Looks up a tag. Matching ignores ASCII case and surrounding space.
    #[must_use]
    pub fn lookup(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        REGISTRY
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tag))
            .map(|(_, category)| *category)
    }

    /// Resolves a tag, falling back to [`Category::Generic`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        Self::lookup(tag).unwrap_or_else(|| {
            tracing::debug!(tag, "unknown category, using generic shim");
            Self::Generic
        })
    }

    /// Returns the canonical tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Composite => "composite",
            Self::Datastore => "datastore",
            Self::Messaging => "messaging",
            Self::Promise => "promise",
            Self::Transaction => "transaction",
            Self::WebFramework => "web-framework",
        }
    }

    /// Returns true if a shim of this category offers the `other` API.
    #[must_use]
    pub fn provides(&self, other: Self) -> bool {
        *self == other || (*self == Self::Composite && other != Self::Generic)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
