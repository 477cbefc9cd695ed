//! Attribute release: which principal attributes a registered service is
//! allowed to see.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::authn::Principal;

/// Governs the attribute view exposed to a relying service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeReleasePolicy {
    /// Release every principal attribute.
    ReturnAll,
    /// Release only the named attributes.
    ReturnAllowed(Vec<String>),
    /// Release the named attributes under mapped (renamed) keys.
    ReturnMapped(HashMap<String, String>),
    /// Release nothing.
    DenyAll,
}

impl AttributeReleasePolicy {
    /// Compute the released attribute view for a principal.
    #[must_use]
    pub fn release(&self, principal: &Principal) -> HashMap<String, Vec<String>> {
        match self {
            Self::ReturnAll => principal.attributes().clone(),
            Self::ReturnAllowed(allowed) => allowed
                .iter()
                .filter_map(|name| {
                    principal
                        .attributes()
                        .get(name)
                        .map(|values| (name.clone(), values.clone()))
                })
                .collect(),
            Self::ReturnMapped(mapping) => mapping
                .iter()
                .filter_map(|(name, mapped)| {
                    principal
                        .attributes()
                        .get(name)
                        .map(|values| (mapped.clone(), values.clone()))
                })
                .collect(),
            Self::DenyAll => HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal::new("casuser")
            .with_attribute("groups", ["staff"])
            .with_attribute("mail", ["casuser@example.org"])
    }

    #[test]
    fn return_all_and_deny_all() {
        assert_eq!(
            AttributeReleasePolicy::ReturnAll.release(&principal()).len(),
            2
        );
        assert!(AttributeReleasePolicy::DenyAll
            .release(&principal())
            .is_empty());
    }

    #[test]
    fn return_allowed_filters_to_named_attributes() {
        let released =
            AttributeReleasePolicy::ReturnAllowed(vec!["mail".to_string(), "absent".to_string()])
                .release(&principal());
        assert_eq!(released.len(), 1);
        assert_eq!(released["mail"], ["casuser@example.org"]);
    }

    #[test]
    fn return_mapped_renames_keys() {
        let mapping = HashMap::from([("mail".to_string(), "email".to_string())]);
        let released = AttributeReleasePolicy::ReturnMapped(mapping).release(&principal());
        assert_eq!(released["email"], ["casuser@example.org"]);
        assert!(!released.contains_key("mail"));
    }
}
