//! AMI frame: an unordered set of `key: value` fields.

use crate::{
    constants::{MESSAGE_AUTH_ACCEPTED, RESPONSE_ERROR, RESPONSE_SUCCESS},
    headers::AmiHeader,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One AMI protocol message.
///
/// The same type carries commands (which always have an `Action` field) and
/// everything the server sends back: responses, events and the login reply.
/// Field order carries no meaning; equality compares the field set.
///
/// ```
/// use asterisk_ami_tokio::{AmiHeader, Frame};
///
/// let cmd = Frame::action("Originate")
///     .with_field("Channel", "PJSIP/1000")
///     .with_field("Exten", "2000");
/// assert_eq!(cmd.header(AmiHeader::Action), Some("Originate"));
/// assert_eq!(cmd.len(), 3);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame {
    fields: HashMap<String, String>,
}

impl Frame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a command frame with its `Action` field set.
    pub fn action(name: impl Into<String>) -> Self {
        Self::new().with_field(AmiHeader::Action, name)
    }

    /// Builder form of [`set_field`](Self::set_field).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Set or overwrite a field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .insert(name.into(), value.into());
    }

    /// Look up a field by name (case-sensitive).
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.as_str())
    }

    /// Look up a well-known field.
    pub fn header(&self, header: AmiHeader) -> Option<&str> {
        self.field(header.as_str())
    }

    /// Remove a field, returning its value if it existed.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields
            .remove(name)
    }

    /// All fields as a map.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// Iterate over `(name, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields
            .len()
    }

    /// `true` for a frame with no fields (a stray blank line on the wire).
    pub fn is_empty(&self) -> bool {
        self.fields
            .is_empty()
    }

    /// Consume the frame, returning the underlying map.
    pub fn into_fields(self) -> HashMap<String, String> {
        self.fields
    }

    /// `Action` field of a command.
    pub fn action_name(&self) -> Option<&str> {
        self.header(AmiHeader::Action)
    }

    /// `ActionID` field, echoed by Asterisk on the matching response.
    pub fn action_id(&self) -> Option<&str> {
        self.header(AmiHeader::ActionId)
    }

    /// `Response` field (`Success`, `Error`, `Follows`, ...).
    pub fn response(&self) -> Option<&str> {
        self.header(AmiHeader::Response)
    }

    /// `Message` field.
    pub fn message(&self) -> Option<&str> {
        self.header(AmiHeader::Message)
    }

    /// `Event` field, present on asynchronous events.
    pub fn event(&self) -> Option<&str> {
        self.header(AmiHeader::Event)
    }

    /// Login reply test: `Response: Success` OR `Message: Authentication accepted`.
    /// Either signal alone is enough.
    pub fn is_auth_success(&self) -> bool {
        self.response() == Some(RESPONSE_SUCCESS) || self.message() == Some(MESSAGE_AUTH_ACCEPTED)
    }

    /// `Response: Error`.
    pub fn is_error_response(&self) -> bool {
        self.response() == Some(RESPONSE_ERROR)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.fields {
            if key.eq_ignore_ascii_case(AmiHeader::Secret.as_str()) {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

/// Wire text, as produced by [`serialize`](crate::protocol::serialize).
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&crate::protocol::serialize(self)))
    }
}

impl From<HashMap<String, String>> for Frame {
    fn from(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }
}

impl<K, V> FromIterator<(K, V)> for Frame
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K, V> Extend<(K, V)> for Frame
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set_field(k, v);
        }
    }
}
