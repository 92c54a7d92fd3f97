use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::protocol::codec;

/// A named function invocation.
///
/// Fields are private so a `Call` cannot change after construction; its
/// identity is derived from its content by [`hash_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    name: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: BTreeMap<String, Value>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl Call {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn id(&self) -> String {
        hash_id(self)
    }
}

/// Content hash of a call: SHA-256 over its canonical encoding, lowercase hex.
///
/// Two calls with equal name, args, kwargs and tags always share an id.
pub fn hash_id(call: &Call) -> String {
    let hash = Sha256::digest(codec::encode_call(call));
    format!("{hash:x}")
}
