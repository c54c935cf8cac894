//! Namespaced event names.

use std::fmt;
use std::sync::Arc;

/// A fully namespaced event (topic) name.
///
/// Built only at the adapter boundary, so the namespace is applied exactly
/// once. Two names are equal iff their namespaced forms are equal.
///
/// ```
/// use pubsubvisor::EventName;
///
/// let name = EventName::new(Some("staging"), "user.deleted");
/// assert_eq!(name.as_str(), "staging.user.deleted");
/// assert_eq!(EventName::new(None, "user.deleted").as_str(), "user.deleted");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventName(Arc<str>);

impl EventName {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{ns}.{name}").into()),
            None => Self(name.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&EventName> for Arc<str> {
    fn from(name: &EventName) -> Self {
        Arc::clone(&name.0)
    }
}
