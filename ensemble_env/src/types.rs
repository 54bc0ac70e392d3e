//! Common types for the Ensemble transport layer.

use crate::error::EnvError;
use nalgebra::DVector;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Address of one participant in a transport world.
///
/// Rank 0 is always the coordinator; engines occupy ranks `1..size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank(pub u32);

impl Rank {
    /// The coordinating rank, which owns no simulation state.
    pub const COORDINATOR: Rank = Rank(0);

    /// Returns the rank as a vector index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn is_coordinator(&self) -> bool {
        *self == Self::COORDINATOR
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank#{}", self.0)
    }
}

/// Envelope for messages moved between ranks.
///
/// The payload is opaque bytes; the layers above decide what it means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender-side sequence stamp (0 when unused)
    pub seq: u64,

    /// Encoded message body
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from raw payload bytes.
    pub fn new(seq: u64, payload: Vec<u8>) -> Self {
        Self { seq, payload }
    }

    /// Encodes a serializable message into an envelope.
    pub fn encode<T: Serialize>(seq: u64, message: &T) -> Result<Self, EnvError> {
        Ok(Self::new(seq, serde_json::to_vec(message)?))
    }

    /// Decodes the payload into a message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Shape of a [`Value`], used to build same-shaped placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Array(usize),
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Array(len) => write!(f, "array[{}]", len),
        }
    }
}

/// A float that keeps NaN and the infinities on the wire.
///
/// JSON has no literal for them, so finite values travel as numbers and the
/// rest as the strings `"NaN"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireF64(pub f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum WireRepr {
    Number(f64),
    Text(String),
}

impl Serialize for WireF64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let x = self.0;
        if x.is_finite() {
            serializer.serialize_f64(x)
        } else if x.is_nan() {
            serializer.serialize_str("NaN")
        } else if x > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

impl<'de> Deserialize<'de> for WireF64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireRepr::deserialize(deserializer)? {
            WireRepr::Number(x) => Ok(WireF64(x)),
            WireRepr::Text(text) => match text.as_str() {
                "NaN" => Ok(WireF64(f64::NAN)),
                "inf" => Ok(WireF64(f64::INFINITY)),
                "-inf" => Ok(WireF64(f64::NEG_INFINITY)),
                other => Err(serde::de::Error::custom(format!("not a float: {:?}", other))),
            },
        }
    }
}

/// `#[serde(with = "wire_f64")]` adapter for plain `f64` fields.
pub mod wire_f64 {
    use super::WireF64;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        WireF64(*x).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        WireF64::deserialize(deserializer).map(|w| w.0)
    }

    /// Same for `Option<f64>`; `None` stays `null`.
    pub mod option {
        use super::WireF64;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(x: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
            x.map(WireF64).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
            Option::<WireF64>::deserialize(deserializer).map(|w| w.map(|w| w.0))
        }
    }
}

/// A named quantity's value as it travels between engines.
///
/// Grids are exchanged flattened; the engines own the layout. Non-finite
/// elements survive the wire through [`WireF64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireValue", from = "WireValue")]
pub enum Value {
    Scalar(f64),
    Array(DVector<f64>),
}

impl Value {
    /// Creates an array value from a slice.
    pub fn array(values: &[f64]) -> Self {
        Value::Array(DVector::from_column_slice(values))
    }

    /// Returns the shape of this value.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::Scalar,
            Value::Array(v) => Shape::Array(v.len()),
        }
    }

    /// Returns a zero-valued value of the same shape.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape())
    }

    /// Returns a zero-valued value of the given shape.
    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Returns a value of the given shape with every element set to `fill`.
    pub fn filled(shape: Shape, fill: f64) -> Self {
        match shape {
            Shape::Scalar => Value::Scalar(fill),
            Shape::Array(len) => Value::Array(DVector::from_element(len, fill)),
        }
    }

    /// Returns the scalar, if this is one.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            Value::Array(_) => None,
        }
    }

    /// Returns the elements as a flat slice (a scalar is one element).
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Value::Scalar(x) => std::slice::from_ref(x),
            Value::Array(v) => v.as_slice(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    /// Applies `f` to every element, keeping the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Value::Scalar(x) => Value::Scalar(f(*x)),
            Value::Array(v) => Value::Array(v.map(f)),
        }
    }

    /// Combines two same-shaped values element-wise.
    pub fn combine(&self, other: &Value, op: ReduceOp) -> Result<Self, EnvError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(op.apply(*a, *b))),
            (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                Ok(Value::Array(a.zip_map(b, |x, y| op.apply(x, y))))
            }
            _ => Err(EnvError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireValue {
    Scalar(WireF64),
    Array(Vec<WireF64>),
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(x) => WireValue::Scalar(WireF64(x)),
            Value::Array(v) => WireValue::Array(v.iter().copied().map(WireF64).collect()),
        }
    }
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Scalar(x) => Value::Scalar(x.0),
            WireValue::Array(v) => Value::Array(DVector::from_iterator(v.len(), v.into_iter().map(|x| x.0))),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Value::Array(DVector::from_vec(values))
    }
}

/// Element-wise reduction operator for collective reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// Combines two elements.
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    /// Neutral element: `apply(identity, x) == x`.
    pub fn identity(&self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
        }
    }
}
