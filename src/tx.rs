use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 content key.
pub const CONTENT_KEY_LEN: usize = 64;

/// A record carried by a block.
///
/// The ledger only ever looks at `hash`. Everything else the caller attached
/// (identity fields, filenames, uploader, ...) lives in `metadata` and is
/// stored verbatim, flattened next to `hash` in the serialized form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    /// The content key this transaction is indexed by.
    pub hash: String,
    /// Opaque caller metadata.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Transaction {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field, replacing any previous value under `name`.
    /// A field named `hash` would shadow the key and is ignored.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != "hash" {
            self.metadata.insert(name, value.into());
        }
        self
    }

    /// Look a field up by name; `"hash"` resolves to the content key.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "hash" {
            return Some(Value::String(self.hash.clone()));
        }
        self.metadata.get(name).cloned()
    }

    /// Whether the named field equals `value`.
    pub fn field_matches(&self, name: &str, value: &Value) -> bool {
        if name == "hash" {
            return value.as_str() == Some(self.hash.as_str());
        }
        self.metadata.get(name) == Some(value)
    }
}

/// SHA-256 of a document's bytes, lowercase hex.
pub fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// True for a 64-character lowercase or uppercase hex string.
pub fn is_content_key(s: &str) -> bool {
    s.len() == CONTENT_KEY_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
