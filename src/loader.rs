//! Application loader
//!
//! Resolves a `module:object` locator string to a concrete app instance
//! before the server core ever sees it; the core itself only receives the
//! already-resolved callable. Rust has no import-by-name, so locators
//! resolve against a registry of built-in constructors.

use crate::app::SharedApp;
use crate::demo;
use anyhow::{bail, Context, Result};

type AppFactory = fn() -> SharedApp;

/// Known applications, `(module, object)` -> constructor.
const REGISTRY: &[(&str, &str, AppFactory)] = &[
    ("demo", "hello", demo::hello),
    ("demo", "slow", demo::slow),
];

/// Resolve `module:object` into an app instance.
pub fn resolve(locator: &str) -> Result<SharedApp> {
    let (module, object) = locator
        .split_once(':')
        .with_context(|| format!("app locator '{}' is not of the form module:object", locator))?;

    for (m, o, factory) in REGISTRY {
        if *m == module && *o == object {
            return Ok(factory());
        }
    }

    let known: Vec<String> = REGISTRY
        .iter()
        .map(|(m, o, _)| format!("{}:{}", m, o))
        .collect();
    bail!(
        "unknown app '{}' (known apps: {})",
        locator,
        known.join(", ")
    );
}

// =============================================================================
// Unit Tests
// =============================================================================
