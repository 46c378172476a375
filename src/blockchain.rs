use std::fmt::Write;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::tx::Transaction;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// One entry of the chain.
///
/// `block_hash` is computed once in [`Block::new`] and stored. Nothing
/// recomputes it implicitly; [`Block::compute_hash`] is only used to check it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    /// Position in the chain, 0 for genesis.
    pub index: u64,
    /// RFC 3339 creation time, UTC, microsecond precision.
    pub timestamp: String,
    /// Records carried by this block. Empty for genesis.
    pub transactions: Vec<Transaction>,
    /// `block_hash` of the predecessor.
    pub previous_hash: String,
    /// SHA-256 over the canonical encoding of the other four fields.
    pub block_hash: String,
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            block_hash: String::new(),
        };
        block.block_hash = block.compute_hash();
        block
    }

    pub fn genesis() -> Self {
        Self::new(0, Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Hash the block's content fields as they currently are.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }

    /// The digest input: `{index, previous_hash, timestamp, transactions}`
    /// with object keys sorted at every depth, `", "` and `": "` as
    /// separators and every non-ASCII character escaped as `\uXXXX`.
    /// Chains written by existing deployments hash over exactly these bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let content = json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "previous_hash": self.previous_hash,
        });
        let mut out = String::new();
        write_canonical(&content, &mut out);
        out.into_bytes()
    }

    /// Whether the stored `block_hash` still matches the content.
    pub fn hash_matches(&self) -> bool {
        self.block_hash == self.compute_hash()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.transactions.iter().any(|tx| tx.hash == key)
    }
}

// Sorting is done here rather than relying on serde_json's map ordering,
// which flips to insertion order if any crate in the graph enables
// `preserve_order`.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => write_float(f, out),
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(k, out);
                out.push_str(": ");
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

// Printable ASCII passes through; everything else above it becomes UTF-16
// escapes, so astral characters turn into a surrogate pair.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units).iter() {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

// Shortest round-trip digits. Plain notation with at least one fractional
// digit for decimal exponents in -4..16, otherwise `d.ddde+XX`.
fn write_float(f: f64, out: &mut String) {
    if !f.is_finite() {
        out.push_str(match f {
            f if f.is_nan() => "NaN",
            f if f > 0.0 => "Infinity",
            _ => "-Infinity",
        });
        return;
    }

    let sci = format!("{f:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let mantissa = match mantissa.strip_prefix('-') {
        Some(m) => {
            out.push('-');
            m
        }
        None => mantissa,
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if (-4..16).contains(&exp) {
        if exp < 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-exp - 1) as usize));
            out.push_str(&digits);
        } else {
            let point = exp as usize + 1;
            if digits.len() > point {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            } else {
                out.push_str(&digits);
                out.extend(std::iter::repeat('0').take(point - digits.len()));
                out.push_str(".0");
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exp.abs());
    }
}
