//! Triple-entry signing.
//!
//! Each ledger entry carries three SHA-256 signatures over the same canonical
//! payload: one keyed by the actor id, one by the recipient id and one by the
//! auditor key. An entry verifies only when all three recompute identically.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::store::LedgerEntry;

/// The three signatures attached to a ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatures {
    pub actor_sig: String,
    pub recipient_sig: String,
    pub auditor_sig: String,
}

/// Outcome of re-checking an entry's signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Verification {
    pub actor_valid: bool,
    pub recipient_valid: bool,
    pub auditor_valid: bool,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.actor_valid && self.recipient_valid && self.auditor_valid
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSigner {
    secret: String,
    auditor_key: String,
}

impl LedgerSigner {
    pub fn new(secret: impl Into<String>, auditor_key: impl Into<String>) -> Self {
        LedgerSigner {
            secret: secret.into(),
            auditor_key: auditor_key.into(),
        }
    }

    /// Hex-encoded SHA-256 of `canonical(payload) || secret || role_key`
    pub fn sign(&self, payload: &JsonValue, role_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(payload).as_bytes());
        hasher.update(self.secret.as_bytes());
        hasher.update(role_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn sign_entry(&self, payload: &JsonValue, actor_id: &str, recipient_id: &str) -> Signatures {
        Signatures {
            actor_sig: self.sign(payload, actor_id),
            recipient_sig: self.sign(payload, recipient_id),
            auditor_sig: self.sign(payload, &self.auditor_key),
        }
    }

    pub fn verify(&self, entry: &LedgerEntry) -> Verification {
        let expected = self.sign_entry(&entry.payload, &entry.actor_id, &entry.recipient_id);
        Verification {
            actor_valid: expected.actor_sig == entry.actor_sig,
            recipient_valid: expected.recipient_sig == entry.recipient_sig,
            auditor_valid: expected.auditor_sig == entry.auditor_sig,
        }
    }
}

/// JSON text as Python's `json.dumps(value, sort_keys=True)` renders it:
/// `", "` and `": "` separators, ASCII-only strings and Python float repr.
/// Signatures made by either side therefore agree.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(key, out);
                out.push_str(": ");
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        JsonValue::String(text) => write_string(text, out),
        JsonValue::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() => out.push_str(&float_repr(float)),
            _ => out.push_str(&number.to_string()),
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Everything outside printable ASCII becomes `\uXXXX`, astral characters
/// as a surrogate pair
fn write_string(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
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
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
    }
    out.push('"');
}

/// Shortest round-trip digits laid out like Python's `repr(float)`: fixed
/// notation for decimal exponents in `-4..16`, otherwise `d.ddde+XX`.
fn float_repr(value: f64) -> String {
    let sci = format!("{:e}", value.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let sign = if value.is_sign_negative() { "-" } else { "" };

    if (-4..16).contains(&exponent) {
        let body = if exponent < 0 {
            format!("0.{}{}", "0".repeat((-exponent - 1) as usize), digits)
        } else {
            let int_len = exponent as usize + 1;
            if digits.len() <= int_len {
                format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
            } else {
                format!("{}.{}", &digits[..int_len], &digits[int_len..])
            }
        };
        format!("{}{}", sign, body)
    } else {
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exponent.abs())
    }
}
