//! Remote procedure channel to the repeater device.
//!
//! The transport itself (framing, serialization, the serial link) lives
//! outside this crate; everything here talks to the device through the
//! [`RpcChannel`] trait so tests and the `--simulate` mode can substitute a
//! fake device.

use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport-level failure. Fatal to the current operation; callers may
    /// retry the whole enclosing apply/fetch, never the individual call.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The device replied, but not with the shape the caller expected.
    #[error("bad reply from `{method}`: expected {expected}")]
    BadReply {
        method: String,
        expected: &'static str,
    },
}

// ── Values ──────────────────────────────────────────────────────────

/// A dynamically typed RPC value — argument or return.
///
/// The device API is a flat numeric register space with the occasional
/// string (blanking patterns) and heterogeneous list (frame schedules), so a
/// small value enum covers the whole surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Numeric view — accepts both `Float` and `Int`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Flatten a list of numbers. A bare scalar is treated as a 1-element
    /// list, matching how the device returns single-register reads.
    pub fn floats(&self) -> Option<Vec<f64>> {
        match self {
            Value::List(items) => items.iter().map(Value::as_f64).collect(),
            other => other.as_f64().map(|v| vec![v]),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// ── Channel trait ───────────────────────────────────────────────────

/// Synchronous call channel to the repeater device.
///
/// Calls block until a reply or a transport timeout. There is no retry at
/// this layer.
pub trait RpcChannel {
    /// Invoke `method` with `args` and wait for the reply.
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value, RpcError>;

    /// Fire-and-forget variant for operations with no meaningful reply
    /// (e.g. dropping the MCU into its bootloader).
    fn call_noreply(&mut self, method: &str, args: &[Value]) -> Result<(), RpcError>;
}
