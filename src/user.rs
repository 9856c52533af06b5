use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known identifier types.
pub mod identifier_type {
    pub const ID: &str = "$id";
    pub const USER: &str = "$userId";
    pub const DEVICE: &str = "$deviceId";
    pub const SESSION: &str = "$sessionId";
}

const USER_PROPERTIES_STARTING_CAPACITY: usize = 10;

/// A resolved user: identifiers by identifier type plus user-defined and SDK-defined properties.
///
/// The engine performs no normalization; values are matched exactly as supplied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HackleUser {
    pub identifiers: HashMap<String, String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default)]
    pub hackle_properties: HashMap<String, Value>,
}

impl HackleUser {
    /// Starts a builder with the `$id` identifier set.
    pub fn with_id(id: impl Into<String>) -> HackleUserBuilder {
        let mut builder = HackleUserBuilder::new();
        builder.id(id);
        builder
    }

    pub fn builder() -> HackleUserBuilder {
        HackleUserBuilder::new()
    }

    /// Returns the identifier of `identifier_type`, if the user has one.
    pub fn identifier(&self, identifier_type: &str) -> Option<&str> {
        self.identifiers.get(identifier_type).map(String::as_str)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn hackle_property(&self, key: &str) -> Option<&Value> {
        self.hackle_properties.get(key)
    }
}

/// Contains methods for configuring a [HackleUser].
pub struct HackleUserBuilder {
    identifiers: HashMap<String, String>,
    properties: HashMap<String, Value>,
    hackle_properties: HashMap<String, Value>,
}

impl HackleUserBuilder {
    pub fn new() -> Self {
        Self {
            identifiers: HashMap::new(),
            properties: HashMap::with_capacity(USER_PROPERTIES_STARTING_CAPACITY),
            hackle_properties: HashMap::new(),
        }
    }

    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.identifier(identifier_type::ID, id)
    }

    pub fn user_id(&mut self, user_id: impl Into<String>) -> &mut Self {
        self.identifier(identifier_type::USER, user_id)
    }

    pub fn device_id(&mut self, device_id: impl Into<String>) -> &mut Self {
        self.identifier(identifier_type::DEVICE, device_id)
    }

    /// Sets an identifier. Empty identifiers are ignored.
    pub fn identifier(
        &mut self,
        identifier_type: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.identifiers.insert(identifier_type.into(), value);
        }
        self
    }

    pub fn property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn hackle_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.hackle_properties.insert(key.into(), value.into());
        self
    }

    pub fn build(&self) -> HackleUser {
        HackleUser {
            identifiers: self.identifiers.clone(),
            properties: self.properties.clone(),
            hackle_properties: self.hackle_properties.clone(),
        }
    }
}

impl Default for HackleUserBuilder {
    fn default() -> Self {
        Self::new()
    }
}
