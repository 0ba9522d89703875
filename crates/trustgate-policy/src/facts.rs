//! Facts: the named values a policy expression is evaluated against.

use std::collections::BTreeMap;

use trustgate_core::{AttributeMap, AttributeValue, Identifier};

/// Well-known fact names.
pub mod names {
    /// Prefix under which subject attributes appear (`subject.role`, ...).
    pub const SUBJECT_PREFIX: &str = "subject.";
    /// The subject's identifier in its textual form.
    pub const SUBJECT_IDENTIFIER: &str = "subject.identifier";
    /// The resource being accessed.
    pub const RESOURCE_ID: &str = "resource.id";
    /// The action being performed.
    pub const ACTION_ID: &str = "action.id";
}

/// Named facts for a single evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts(BTreeMap<String, AttributeValue>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts for a subject acting on a resource.
    ///
    /// Each attribute becomes `subject.<key>`. The identifier, resource and
    /// action are inserted last so an attribute cannot shadow them.
    pub fn for_request(
        subject: &Identifier,
        attributes: &AttributeMap,
        resource: &str,
        action: &str,
    ) -> Self {
        let mut facts = Self::new();
        for (key, value) in attributes {
            facts.insert(format!("{}{}", names::SUBJECT_PREFIX, key), value.clone());
        }
        facts.insert(names::SUBJECT_IDENTIFIER, subject.to_string());
        facts.insert(names::RESOURCE_ID, resource);
        facts.insert(names::ACTION_ID, action);
        facts
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, AttributeValue)> for Facts {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate_core::Keypair;

    #[test]
    fn test_request_facts_cannot_be_shadowed() {
        let id = Identifier::derive(&Keypair::from_seed(&[7; 32]).public_key());
        let mut attrs = AttributeMap::new();
        attrs.insert("role".into(), "admin".into());
        attrs.insert("identifier".into(), "spoofed".into());

        let facts = Facts::for_request(&id, &attrs, "/projects/1", "read");
        assert_eq!(facts.get("subject.role"), Some(&AttributeValue::from("admin")));
        assert_eq!(
            facts.get(names::SUBJECT_IDENTIFIER),
            Some(&AttributeValue::Text(id.to_string()))
        );
        assert_eq!(facts.get(names::RESOURCE_ID), Some(&AttributeValue::from("/projects/1")));
        assert_eq!(facts.get(names::ACTION_ID), Some(&AttributeValue::from("read")));
        assert_eq!(facts.len(), 4);
    }
}
