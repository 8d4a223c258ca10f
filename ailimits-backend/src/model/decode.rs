//! Tolerant field extraction over untyped JSON.
//!
//! Upstream payloads drift between API versions, so every accessor falls back
//! to zero/empty instead of failing the whole parse.

use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct Loose<'a>(Option<&'a Value>);

impl<'a> Loose<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self(Some(value))
    }

    /// Object member; absent if this is not an object or has no such key
    pub fn get(self, key: &str) -> Loose<'a> {
        Loose(self.0.and_then(|v| v.get(key)))
    }

    /// Array element; absent if out of range or not an array
    pub fn at(self, index: usize) -> Loose<'a> {
        Loose(self.0.and_then(|v| v.get(index)))
    }

    pub fn is_present(self) -> bool {
        matches!(self.0, Some(v) if !v.is_null())
    }

    /// Numbers, or strings holding a number
    pub fn opt_f64(self) -> Option<f64> {
        match self.0? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn f64(self) -> f64 {
        self.opt_f64().unwrap_or(0.0)
    }

    pub fn opt_i64(self) -> Option<i64> {
        match self.0? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|n| n.is_finite()).map(|f| f as i64))
            }
            _ => None,
        }
    }

    pub fn i64(self) -> i64 {
        self.opt_i64().unwrap_or(0)
    }

    pub fn opt_str(self) -> Option<&'a str> {
        self.0.and_then(Value::as_str)
    }

    pub fn str(self) -> &'a str {
        self.opt_str().unwrap_or("")
    }

    pub fn opt_bool(self) -> Option<bool> {
        self.0.and_then(Value::as_bool)
    }

    pub fn bool(self) -> bool {
        self.opt_bool().unwrap_or(false)
    }

    /// Array elements; empty for anything that is not an array
    pub fn items(self) -> impl Iterator<Item = Loose<'a>> {
        self.0
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|v| Loose(Some(v)))
    }
}
