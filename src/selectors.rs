//! Workload selectors: the attributes a registration entry matches on.

use std::fmt;

/// A `type:value` selector, e.g. `unix` / `uid:1000`.
///
/// Ordering is by type, then by value, which is the normalized order used
/// when deriving registration entry keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector {
    /// Selector type, usually the name of the workload attestor that produced it.
    pub r#type: String,
    /// Selector value.
    pub value: String,
}

impl Selector {
    /// Creates a selector from raw type and value.
    pub fn new(r#type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.r#type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_type_colon_value() {
        assert_eq!(Selector::new("k8s", "ns:bar").to_string(), "k8s:ns:bar");
    }

    #[test]
    fn ordering_is_type_then_value() {
        let mut selectors = vec![
            Selector::new("unix", "uid:1"),
            Selector::new("k8s", "ns:b"),
            Selector::new("k8s", "ns:a"),
        ];
        selectors.sort();
        assert_eq!(
            selectors,
            vec![
                Selector::new("k8s", "ns:a"),
                Selector::new("k8s", "ns:b"),
                Selector::new("unix", "uid:1"),
            ]
        );
    }
}
