//! Data-access specialization.
//!
//! Query methods get segments named after the operation they perform
//! rather than the method that was called:
//!
//! - `Datastore/statement/{product}/{collection}/{operation}` when the
//!   collection (table) is known
//! - `Datastore/operation/{product}/{operation}` otherwise

use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use periscope_core::{DatastoreConfig, Result};
use regex::Regex;

use crate::shim::{Interception, Shim};
use crate::spec::{CallbackPosition, Selector};
use crate::target::Target;
use crate::value::ArgView;

const UNKNOWN_PRODUCT: &str = "Unknown";

static OPERATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:/\*.*?\*/\s*)*([a-z]+)").ok());
static FROM_TABLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\bfrom\s+[`"\[]?([\w.$]+)"#).ok());
static INTO_TABLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\binto\s+[`"\[]?([\w.$]+)"#).ok());
static UPDATE_TABLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)^\s*update\s+[`"\[]?([\w.$]+)"#).ok());
static LITERALS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.)*"|\b\d+(?:\.\d+)?\b"#).ok()
});

/// What one data operation does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Operation kind (`select`, `insert`, `find`...).
    pub operation: String,
    /// Table or collection, if known.
    pub collection: Option<String>,
    /// Raw query text, if there is one.
    pub query: Option<String>,
    /// Completion callback, for callback-style clients.
    pub callback: Option<CallbackPosition>,
}

impl QueryDescriptor {
    /// Describes an operation.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    /// Sets the collection.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Sets the query text.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub const fn callback(mut self, position: CallbackPosition) -> Self {
        self.callback = Some(position);
        self
    }

    /// Derives operation and table from SQL text.
    ///
    /// Unrecognized statements get operation `other` and no table.
    #[must_use]
    pub fn from_sql(sql: &str) -> Self {
        let operation = capture(&OPERATION, sql)
            .map(|op| op.to_ascii_lowercase())
            .filter(|op| {
                matches!(
                    op.as_str(),
                    "select" | "insert" | "update" | "delete" | "replace" | "call" | "with"
                )
            })
            .unwrap_or_else(|| "other".to_string());

        let collection = match operation.as_str() {
            "select" | "delete" | "with" => capture(&FROM_TABLE, sql),
            "insert" | "replace" => capture(&INTO_TABLE, sql),
            "update" => capture(&UPDATE_TABLE, sql),
            _ => None,
        };

        Self {
            operation,
            collection,
            query: Some(sql.to_string()),
            callback: None,
        }
    }

    fn interception(&self, product: &str, config: &DatastoreConfig, args: &ArgView<'_>) -> Interception {
        let mut plan = Interception::named(self.segment_name(product));
        plan.attributes.insert("product".into(), product.into());
        plan.attributes
            .insert("operation".into(), self.operation.clone().into());
        if let Some(collection) = &self.collection {
            plan.attributes
                .insert("collection".into(), collection.clone().into());
        }
        if config.record_queries {
            if let Some(query) = &self.query {
                let sql = if config.obfuscate_queries {
                    normalize_query(query, config.max_query_length)
                } else {
                    truncate(query, config.max_query_length)
                };
                plan.attributes.insert("sql".into(), sql.into());
            }
        }
        plan.callback = self.callback.and_then(|p| p.resolve(args));
        plan
    }

    /// Returns the segment name for `product`.
    #[must_use]
    pub fn segment_name(&self, product: &str) -> String {
        match &self.collection {
            Some(collection) => format!(
                "Datastore/statement/{product}/{collection}/{}",
                self.operation
            ),
            None => format!("Datastore/operation/{product}/{}", self.operation),
        }
    }
}

fn capture(regex: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    regex
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Replaces literals with `?` and truncates to `max_len` bytes.
#[must_use]
pub fn normalize_query(sql: &str, max_len: usize) -> String {
    let normalized = match LITERALS.as_ref() {
        Some(literals) => literals.replace_all(sql, "?").into_owned(),
        None => sql.to_string(),
    };
    truncate(&normalized, max_len)
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Shim for database clients.
#[derive(Clone, Debug)]
pub struct DatastoreShim {
    shim: Shim,
    product: Arc<RwLock<String>>,
}

impl DatastoreShim {
    pub(crate) fn new(shim: Shim) -> Self {
        Self {
            shim,
            product: Arc::new(RwLock::new(UNKNOWN_PRODUCT.to_string())),
        }
    }

    /// Names the database product (`Postgres`, `MongoDB`...).
    pub fn set_datastore(&self, product: impl Into<String>) {
        *self.product.write() = product.into();
    }

    /// Returns the database product.
    #[must_use]
    pub fn datastore(&self) -> String {
        self.product.read().clone()
    }

    /// Wraps query methods.
    ///
    /// `extractor` describes each call. It only sees an [`ArgView`], in
    /// which callbacks are opaque. If it fails, the call runs unrecorded.
    pub fn record_query<E>(&self, target: &Target, selector: impl Into<Selector>, extractor: E) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<QueryDescriptor> + Send + Sync + 'static,
    {
        let extractor = Arc::new(extractor);
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            let product = Arc::clone(&self.product);
            let extractor = Arc::clone(&extractor);
            move |call| {
                shim.intercept_call(&original, call, |args| {
                    let descriptor = extractor(args)?;
                    let product = product.read().clone();
                    Ok(descriptor.interception(&product, &shim.agent().config().datastore, args))
                })
            }
        })
    }

    /// Wraps methods that perform a fixed, query-less operation
    /// (`connect`, `ping`...). A trailing callback completes the call.
    pub fn record_operation(
        &self,
        target: &Target,
        selector: impl Into<Selector>,
        operation: impl Into<String>,
    ) -> Target {
        let operation = operation.into();
        self.record_query(target, selector, move |_| {
            Ok(QueryDescriptor::new(operation.clone()).callback(CallbackPosition::Last))
        })
    }
}

impl Deref for DatastoreShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}
