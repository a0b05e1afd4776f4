//! Mock SQL client with callback, synchronous and future-returning queries.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::ShimError;
use periscope_shim::{
    CallError, CallbackPosition, DatastoreShim, Function, QueryDescriptor, Target, Value,
};
use serde_json::json;

use super::yield_once;

/// Product name reported by [`instrument`].
pub const PRODUCT: &str = "MockSQL";

/// Queries containing this marker fail.
pub const FAILING: &str = "FAIL";

/// An in-memory SQL client.
#[derive(Debug, Clone)]
pub struct MockSqlClient {
    target: Target,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockSqlClient {
    /// Creates a client.
    ///
    /// - `query(sql, [callback])` calls back `(err, rows)` when given a
    ///   callback and returns the rows otherwise
    /// - `query_async(sql)` resolves to the rows after one suspension
    /// - `connect(callback)` calls back `(null)`
    #[must_use]
    pub fn new() -> Self {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&executed);
        let query = Function::sync("query", 2, move |call| {
            let sql = call.arg(0).and_then(Value::as_str).unwrap_or_default().to_string();
            log.lock().push(sql.clone());
            let failed = sql.contains(FAILING);
            match call.arg(1) {
                Some(Value::Function(callback)) => {
                    let args = if failed {
                        vec![json!("syntax error").into(), Value::Undefined]
                    } else {
                        vec![serde_json::Value::Null.into(), rows().into()]
                    };
                    let _ = callback.invoke(args);
                    Ok(Value::Undefined)
                }
                _ if failed => Err(CallError::new("syntax error")),
                _ => Ok(rows().into()),
            }
        });

        let log = Arc::clone(&executed);
        let query_async = Function::future("query_async", 1, move |call| {
            let sql = call.arg(0).and_then(Value::as_str).unwrap_or_default().to_string();
            log.lock().push(sql.clone());
            async move {
                yield_once().await;
                if sql.contains(FAILING) {
                    Err(CallError::new("syntax error"))
                } else {
                    Ok(rows().into())
                }
            }
        });

        let connect = Function::sync("connect", 1, |call| {
            if let Some(Value::Function(callback)) = call.arg(0) {
                let _ = callback.invoke(vec![serde_json::Value::Null.into()]);
            }
            Ok(Value::Undefined)
        });

        Self {
            target: Target::new("Client")
                .with("query", query)
                .with("query_async", query_async)
                .with("connect", connect),
            executed,
        }
    }

    /// Returns the client object.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns every SQL string the client ran.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

impl Default for MockSqlClient {
    fn default() -> Self {
        Self::new()
    }
}

fn rows() -> serde_json::Value {
    json!([{ "id": 1, "name": "ada" }])
}

/// Instruments a client the way a data-access script would.
pub fn instrument(shim: &DatastoreShim, client: &Target) {
    shim.set_datastore(PRODUCT);
    shim.record_query(client, ["query", "query_async"], |args| {
        let sql = args
            .str(0)
            .ok_or_else(|| ShimError::instrumentation("query called without SQL"))?;
        Ok(QueryDescriptor::from_sql(sql).callback(CallbackPosition::Last))
    });
    shim.record_operation(client, "connect", "connect");
}
