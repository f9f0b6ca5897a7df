//! Value kinds and the capability table
//!
//! A knob is generic over its value type. The four supported kinds form a
//! closed set; every cross-kind operation (cloning, script coercion,
//! hashing) dispatches on the [`ValueKind`] tag through the trait methods
//! below rather than on runtime type inspection.

use crate::traits::{HashSink, StringInterpolator};
use crate::types::ValueKind;
use serde::{Deserialize, Serialize};

/// Dynamically-typed value, as returned by the scripting evaluator and as
/// the interchange form for cross-kind cloning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptValue {
    /// No usable result
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScriptValue {
    /// Numeric approximation used by the POD fast path: float/int pass
    /// through, booleans map to 0/1, anything else is 0.
    pub fn as_f64_lossy(&self) -> f64 {
        match self {
            ScriptValue::Float(v) => *v,
            ScriptValue::Int(v) => *v as f64,
            ScriptValue::Bool(true) => 1.0,
            _ => 0.0,
        }
    }

    /// Python-style truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::None => false,
            ScriptValue::Bool(v) => *v,
            ScriptValue::Int(v) => *v != 0,
            ScriptValue::Float(v) => *v != 0.0,
            ScriptValue::Str(s) => !s.is_empty(),
        }
    }

    /// Round-to-nearest integer index for mapping numeric results through a
    /// string-interpolation table
    fn as_keyframe_index(&self) -> Option<usize> {
        let index = match self {
            ScriptValue::Float(v) => (*v + 0.5).floor() as i64,
            ScriptValue::Int(v) => *v,
            ScriptValue::Bool(true) => 1,
            ScriptValue::Bool(false) => 0,
            _ => return None,
        };
        if index < 0 {
            return None;
        }
        Some(index as usize)
    }
}

/// Capability table implemented by every value kind a knob can hold.
pub trait KnobValue: Clone + PartialEq + Send + Sync + 'static {
    /// Tag for cross-kind dispatch
    const KIND: ValueKind;

    /// Type-appropriate zero value, used for unset views and fresh knobs
    fn zero() -> Self;

    /// Lossless-enough numeric view, used for clamping, keyframes and
    /// calculus. Strings read as 0 and are rejected earlier by kind checks.
    fn to_f64(&self) -> f64;

    /// Narrow a numeric result back into the kind (round-half-up for
    /// integers, threshold for booleans)
    fn from_f64(v: f64) -> Self;

    /// Clamp into `[min, max]`, computed in f64 space for numeric kinds.
    /// Identity for bool and string, which have no clamping semantics.
    fn clamped(&self, min: &Self, max: &Self) -> Self;

    /// Lower bound used to initialize ranges
    fn range_min() -> Self;

    /// Upper bound used to initialize ranges
    fn range_max() -> Self;

    /// Coerce a scripting result into this kind. `strings` is the
    /// interpolation table of string knobs; numeric results on a string
    /// knob map through it, and yield the empty string without one.
    fn from_script(
        value: &ScriptValue,
        view: crate::types::ViewIdx,
        strings: Option<&dyn StringInterpolator>,
    ) -> Self;

    /// Interchange form for cross-kind cloning
    fn to_variant(&self) -> ScriptValue;

    /// Inverse of [`to_variant`](Self::to_variant) with plain-cast semantics
    /// (float to int truncates, unlike script coercion which rounds)
    fn from_variant(v: &ScriptValue) -> Self;

    /// Contribute this value to a cache-identity digest
    fn append_to_digest(&self, sink: &mut dyn HashSink);
}

impl KnobValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn zero() -> Self {
        false
    }

    fn to_f64(&self) -> f64 {
        if *self { 1.0 } else { 0.0 }
    }

    fn from_f64(v: f64) -> Self {
        v != 0.0
    }

    fn clamped(&self, _min: &Self, _max: &Self) -> Self {
        *self
    }

    fn range_min() -> Self {
        false
    }

    fn range_max() -> Self {
        true
    }

    fn from_script(
        value: &ScriptValue,
        _view: crate::types::ViewIdx,
        _strings: Option<&dyn StringInterpolator>,
    ) -> Self {
        value.is_truthy()
    }

    fn to_variant(&self) -> ScriptValue {
        ScriptValue::Bool(*self)
    }

    fn from_variant(v: &ScriptValue) -> Self {
        v.is_truthy()
    }

    fn append_to_digest(&self, sink: &mut dyn HashSink) {
        sink.append_bool(*self);
    }
}

impl KnobValue for i32 {
    const KIND: ValueKind = ValueKind::Int;

    fn zero() -> Self {
        0
    }

    fn to_f64(&self) -> f64 {
        *self as f64
    }

    fn from_f64(v: f64) -> Self {
        (v + 0.5).floor() as i32
    }

    fn clamped(&self, min: &Self, max: &Self) -> Self {
        let v = (*self as f64).clamp(*min as f64, *max as f64);
        v as i32
    }

    fn range_min() -> Self {
        i32::MIN
    }

    fn range_max() -> Self {
        i32::MAX
    }

    fn from_script(
        value: &ScriptValue,
        _view: crate::types::ViewIdx,
        _strings: Option<&dyn StringInterpolator>,
    ) -> Self {
        match value {
            ScriptValue::Int(v) => *v as i32,
            ScriptValue::Float(v) => (*v + 0.5).floor() as i32,
            ScriptValue::Bool(v) => *v as i32,
            _ => 0,
        }
    }

    fn to_variant(&self) -> ScriptValue {
        ScriptValue::Int(*self as i64)
    }

    fn from_variant(v: &ScriptValue) -> Self {
        match v {
            ScriptValue::Int(v) => *v as i32,
            ScriptValue::Float(v) => *v as i32,
            ScriptValue::Bool(v) => *v as i32,
            _ => 0,
        }
    }

    fn append_to_digest(&self, sink: &mut dyn HashSink) {
        sink.append_i32(*self);
    }
}

impl KnobValue for f64 {
    const KIND: ValueKind = ValueKind::Double;

    fn zero() -> Self {
        0.0
    }

    fn to_f64(&self) -> f64 {
        *self
    }

    fn from_f64(v: f64) -> Self {
        v
    }

    fn clamped(&self, min: &Self, max: &Self) -> Self {
        self.clamp(*min, *max)
    }

    fn range_min() -> Self {
        f64::MIN
    }

    fn range_max() -> Self {
        f64::MAX
    }

    fn from_script(
        value: &ScriptValue,
        _view: crate::types::ViewIdx,
        _strings: Option<&dyn StringInterpolator>,
    ) -> Self {
        match value {
            ScriptValue::Float(v) => *v,
            ScriptValue::Int(v) => *v as f64,
            ScriptValue::Bool(v) => *v as i32 as f64,
            _ => 0.0,
        }
    }

    fn to_variant(&self) -> ScriptValue {
        ScriptValue::Float(*self)
    }

    fn from_variant(v: &ScriptValue) -> Self {
        match v {
            ScriptValue::Float(v) => *v,
            ScriptValue::Int(v) => *v as f64,
            ScriptValue::Bool(v) => *v as i32 as f64,
            _ => 0.0,
        }
    }

    fn append_to_digest(&self, sink: &mut dyn HashSink) {
        sink.append_f64(*self);
    }
}

impl KnobValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn zero() -> Self {
        String::new()
    }

    fn to_f64(&self) -> f64 {
        0.0
    }

    fn from_f64(_v: f64) -> Self {
        String::new()
    }

    fn clamped(&self, _min: &Self, _max: &Self) -> Self {
        self.clone()
    }

    fn range_min() -> Self {
        String::new()
    }

    fn range_max() -> Self {
        String::new()
    }

    fn from_script(
        value: &ScriptValue,
        view: crate::types::ViewIdx,
        strings: Option<&dyn StringInterpolator>,
    ) -> Self {
        if let ScriptValue::Str(s) = value {
            return s.clone();
        }
        // Numeric results index into the string-interpolation table of
        // animated string knobs; without one there is nothing to map to.
        let (Some(index), Some(strings)) = (value.as_keyframe_index(), strings) else {
            return String::new();
        };
        strings.string_from_interpolated_value(index, view)
    }

    fn to_variant(&self) -> ScriptValue {
        ScriptValue::Str(self.clone())
    }

    fn from_variant(v: &ScriptValue) -> Self {
        match v {
            ScriptValue::Str(s) => s.clone(),
            _ => String::new(),
        }
    }

    fn append_to_digest(&self, sink: &mut dyn HashSink) {
        sink.append_str(self);
    }
}
