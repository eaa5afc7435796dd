//! Component registry
//!
//! Computes the ordered list of named components one run will install or
//! upgrade and seeds each with `Pending` before any work starts. The list is
//! deterministic from the options alone: runtime first, then the selected
//! add-ons in the installer's declared order, then the fixed trailing entry
//! representing user extensions. Registration completes before submission
//! returns, so the very first poll always sees the full list.

use crate::runtime::RUNTIME_COMPONENT;
use crate::status::StatusStore;

/// Fixed trailing component representing user-declared extensions
pub const ADDITIONAL_COMPONENTS: &str = "Additional Components";

/// Build the ordered component list for one run.
///
/// `addon_names` comes from the add-on installer's pure name functions and is
/// preserved in order.
pub fn component_list(addon_names: &[String]) -> Vec<String> {
    let mut names = Vec::with_capacity(addon_names.len() + 2);
    names.push(RUNTIME_COMPONENT.to_string());
    names.extend(addon_names.iter().cloned());
    names.push(ADDITIONAL_COMPONENTS.to_string());
    names
}

/// Seed every component `Pending` in order.
pub fn register_components(store: &StatusStore, names: &[String]) {
    for name in names {
        store.register_component(name);
    }
}
