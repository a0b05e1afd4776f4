//! Falsification Tests: Category H - Shim Factory (F042-F045)
//!
//! Claims: a library gets exactly one shim, of the category it declared,
//! and asking a shim for an API it lacks is diagnosed rather than fatal.

use periscope_core::TransactionKind;
use periscope_shim::{Category, Function, RecordSpec, Target, Value};
use periscope_test::AgentHarness;

fn library() -> Target {
    Target::new("lib").with("run", Function::sync("run", 0, |_| Ok(Value::Undefined)))
}

/// F042: Loading a library twice yields the same shim
///
/// # Falsification Attempt
/// Wrap through the first load and inspect through the second; a second
/// wrap record or a second factory entry refutes.
#[test]
fn f042_reload_shares_shim() {
    let harness = AgentHarness::new();
    let lib = library();

    let first = harness.shim("generic", "worker");
    first.wrap(&lib, "run", &RecordSpec::named("Custom/run"));
    let second = harness.shim("datastore", "worker");

    assert_eq!(first.id(), second.id(), "F042 FALSIFIED: second load built a new shim");
    assert_eq!(second.category(), Category::Generic, "F042 FALSIFIED: category changed");
    assert!(second.is_wrapped(&lib, "run"));
    assert_eq!(harness.factory().loaded_count(), 1);
}

/// F043: Unknown tags fall back to the generic shim
#[test]
fn f043_unknown_tag_is_generic() {
    let harness = AgentHarness::new();
    let shim = harness.shim("quantum-database", "qdb");

    assert_eq!(shim.category(), Category::Generic, "F043 FALSIFIED");
    assert!(shim.as_datastore().is_none());
    assert_eq!(harness.misuse_count(), 1, "F043 FALSIFIED: mismatch not diagnosed");

    let lib = library();
    shim.wrap(&lib, "run", &RecordSpec::from_function());
    harness.in_transaction(TransactionKind::Background, |tx| {
        let _ = lib.call_method("run", vec![]);
        assert_eq!(tx.trace().segments_named("run").len(), 1);
    });
}

/// F044: A composite shim offers every specialization over one wrap record
#[test]
fn f044_composite_views_share_record() {
    let harness = AgentHarness::new();
    let shim = harness.shim("composite", "fullstack");
    let lib = library();

    let datastore = shim.as_datastore().unwrap();
    datastore.wrap(&lib, "run", &RecordSpec::named("Custom/run"));

    for wrapped in [
        shim.as_web_framework().unwrap().is_wrapped(&lib, "run"),
        shim.as_messaging().unwrap().is_wrapped(&lib, "run"),
        shim.as_promise().unwrap().is_wrapped(&lib, "run"),
        shim.as_transaction().unwrap().is_wrapped(&lib, "run"),
    ] {
        assert!(wrapped, "F044 FALSIFIED: views keep separate records");
    }
    harness.assert_clean().unwrap();
}

/// F045: Every registered tag and alias selects its category
#[test]
fn f045_tags_select_categories() {
    let harness = AgentHarness::new();
    let cases = [
        ("datastore", Category::Datastore),
        ("data-access", Category::Datastore),
        ("message", Category::Messaging),
        ("promise-chain", Category::Promise),
        ("transaction-boundary", Category::Transaction),
        ("web-routing", Category::WebFramework),
        ("conglomerate", Category::Composite),
    ];

    for (i, (tag, category)) in cases.into_iter().enumerate() {
        let shim = harness.shim(tag, &format!("module-{i}"));
        assert_eq!(shim.category(), category, "F045 FALSIFIED: {tag}");
    }
    for category in Category::ALL {
        let shim = harness.shim(category.name(), &format!("canonical-{category}"));
        assert_eq!(shim.category(), category, "F045 FALSIFIED: {category}");
    }
}
