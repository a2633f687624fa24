//! Message envelope exchanged between holons
//!
//! Every value placed in `parameters` or `arguments` is stored as text. An
//! absent argument value (or the literal `"None"`) becomes the empty string,
//! so readers never have to distinguish "unset" from "empty".

use crate::registry::ObjectProxy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Argument text that stands for an absent value
const ABSENT_MARKER: &str = "None";

/// Conversion of a parameter or argument value into its stored text
pub trait IntoArgument {
    fn into_argument(self) -> Option<String>;
}

macro_rules! impl_into_argument_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoArgument for $ty {
                fn into_argument(self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

impl_into_argument_display!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char,
    String, &str, &String,
);

impl<T: IntoArgument> IntoArgument for Option<T> {
    fn into_argument(self) -> Option<String> {
        self.and_then(IntoArgument::into_argument)
    }
}

fn normalize_argument(value: Option<String>) -> String {
    match value {
        Some(text) if text != ABSENT_MARKER => text,
        _ => String::new(),
    }
}

fn json_to_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn deserialize_parameters<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|value| json_to_text(value).unwrap_or_default())
        .collect())
}

fn deserialize_arguments<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, normalize_argument(json_to_text(value))))
        .collect())
}

/// Normalized message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip, default = "Uuid::new_v4")]
    id: Uuid,

    #[serde(default)]
    body: String,

    #[serde(default, deserialize_with = "deserialize_parameters")]
    parameters: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_arguments")]
    arguments: BTreeMap<String, String>,

    #[serde(default = "Utc::now")]
    creation_time: DateTime<Utc>,

    #[serde(skip)]
    sender: Option<ObjectProxy>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
            parameters: Vec::new(),
            arguments: BTreeMap::new(),
            creation_time: Utc::now(),
            sender: None,
        }
    }

    pub fn with_parameters<I, T>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoArgument,
    {
        self.set_parameters(parameters);
        self
    }

    pub fn with_arguments<I, K, V>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArgument,
    {
        self.set_arguments(arguments);
        self
    }

    /// Add or replace a single argument
    pub fn with_argument(mut self, key: impl Into<String>, value: impl IntoArgument) -> Self {
        self.arguments
            .insert(key.into(), normalize_argument(value.into_argument()));
        self
    }

    pub fn with_sender(mut self, sender: ObjectProxy) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Replace the parameters, storing every element as text
    ///
    /// Absent elements are stored as the empty string, the same way as
    /// absent argument values.
    pub fn set_parameters<I, T>(&mut self, parameters: I)
    where
        I: IntoIterator<Item = T>,
        T: IntoArgument,
    {
        self.parameters = parameters
            .into_iter()
            .map(|value| value.into_argument().unwrap_or_default())
            .collect();
    }

    /// Replace the arguments, storing every value as text
    ///
    /// Absent values are stored as the empty string. Keys are kept verbatim.
    pub fn set_arguments<I, K, V>(&mut self, arguments: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoArgument,
    {
        self.arguments = arguments
            .into_iter()
            .map(|(key, value)| (key.into(), normalize_argument(value.into_argument())))
            .collect();
    }

    /// Re-apply normalization to the stored fields
    ///
    /// Running this on an already normalized message changes nothing.
    pub fn normalize(&mut self) {
        for value in self.arguments.values_mut() {
            if value == ABSENT_MARKER {
                value.clear();
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    /// Look up an argument value
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn sender(&self) -> Option<&ObjectProxy> {
        self.sender.as_ref()
    }

    /// Check whether two values are the same mailbox entry
    pub fn same_entry(&self, other: &Message) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(body={:?}, parameters={:?}, arguments={:?})",
            self.body, self.parameters, self.arguments
        )
    }
}

/// Event delivered through the generic event interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,

    #[serde(default, deserialize_with = "deserialize_arguments")]
    pub arguments: BTreeMap<String, String>,

    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl IntoArgument) -> Self {
        self.arguments
            .insert(key.into(), normalize_argument(value.into_argument()));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_creation_time_is_stamped() {
        let before = Utc::now();
        let msg = Message::new("hello");
        let after = Utc::now();

        assert!(msg.creation_time() >= before);
        assert!(msg.creation_time() <= after);
    }

    #[test]
    fn test_parameters_are_stringified() {
        let msg = Message::new("move").with_parameters([1.5_f64, -2.0, 3.25]);
        assert_eq!(msg.parameters(), &["1.5", "-2", "3.25"]);
    }

    #[test]
    fn test_absent_parameter_becomes_empty() {
        let msg = Message::new("move").with_parameters([Some(1), None, Some(3)]);
        assert_eq!(msg.parameters(), &["1", "", "3"]);
    }

    #[test]
    fn test_absent_argument_becomes_empty() {
        let msg = Message::new("cmd").with_arguments([("x", None::<i32>), ("y", Some(7))]);

        assert_eq!(msg.argument("x"), Some(""));
        assert_eq!(msg.argument("y"), Some("7"));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut msg = Message::new("cmd").with_arguments([("x", None::<&str>)]);
        assert_eq!(msg.arguments().get("x").map(String::as_str), Some(""));

        let first = msg.arguments().clone();
        msg.normalize();
        assert_eq!(msg.arguments(), &first);
        msg.normalize();
        assert_eq!(msg.arguments(), &first);
    }

    #[test]
    fn test_none_marker_is_normalized() {
        let msg = Message::new("cmd").with_argument("x", "None");
        assert_eq!(msg.argument("x"), Some(""));
    }

    #[test]
    fn test_clone_keeps_identity() {
        let msg = Message::new("a");
        let copy = msg.clone();
        assert!(msg.same_entry(&copy));
        assert!(!msg.same_entry(&Message::new("a")));
    }

    #[test]
    fn test_deserialize_normalizes() {
        let json = r#"{
            "body": "order",
            "parameters": [1, "two", true, null],
            "arguments": {"qty": 3, "note": null, "who": "None", "ok": "yes"},
            "creationTime": "2024-01-01T00:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();

        assert_eq!(msg.body(), "order");
        assert_eq!(msg.parameters(), &["1", "two", "true", ""]);
        assert_eq!(msg.argument("qty"), Some("3"));
        assert_eq!(msg.argument("note"), Some(""));
        assert_eq!(msg.argument("who"), Some(""));
        assert_eq!(msg.argument("ok"), Some("yes"));
        assert_eq!(msg.creation_time().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_serialized_shape() {
        let msg = Message::new("ping").with_argument("k", "v");
        let value = serde_json::to_value(&msg).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 4);
        assert!(object.contains_key("body"));
        assert!(object.contains_key("parameters"));
        assert!(object.contains_key("arguments"));
        assert!(object.contains_key("creationTime"));
    }

    proptest! {
        #[test]
        fn prop_normalize_twice_equals_once(
            args in proptest::collection::btree_map("[a-z]{1,4}", proptest::option::of("[A-Za-z]{0,5}"), 0..8)
        ) {
            let mut msg = Message::new("p").with_arguments(args.clone());
            let once = msg.arguments().clone();
            msg.normalize();
            prop_assert_eq!(msg.arguments(), &once);
            for (key, value) in &args {
                let stored = &once[key];
                match value.as_deref() {
                    None | Some("None") => prop_assert_eq!(stored.as_str(), ""),
                    Some(text) => prop_assert_eq!(stored.as_str(), text),
                }
            }
        }
    }
}
