//! External collaborator interfaces
//!
//! The knob engine consumes, and does not define, the owning node, the
//! animation-curve data structure, the scripting evaluator, the string
//! interpolation table of string knobs, and the cache-identity digest.
//! Each one is a trait implemented by the embedding application.

use crate::types::{AnimationLevel, DimSpec, ValueChange, ViewIdx};
use crate::value::ScriptValue;

/// The owner of a collection of knobs, typically a graph node.
///
/// All methods have no-op defaults so implementations only override what
/// they observe. Notification methods are always called with no knob lock
/// held, so a handler may re-enter the knob (e.g. re-read a value).
pub trait KnobHolder: Send + Sync {
    /// Views declared on the owner. The main view is always implied and
    /// should be included. Wildcard ("all views") knob operations iterate
    /// this list, not the knob's internal storage.
    fn views_list(&self) -> Vec<ViewIdx> {
        vec![ViewIdx::MAIN]
    }

    /// Open a change transaction; nested calls flatten into the outermost one
    fn begin_changes(&self) {}

    /// Close a change transaction; the outermost close fires coalesced
    /// dependency notifications
    fn end_changes(&self) {}

    /// Record a value change, either dispatched immediately or queued while
    /// evaluation is blocked
    fn append_value_change(&self, _change: ValueChange) {}

    /// Whether an enclosing transaction currently blocks evaluation
    fn is_evaluation_blocked(&self) -> bool {
        false
    }

    /// A knob was slaved (`slaved == true`) or unslaved from a master
    fn on_knob_slaved(&self, _knob: &str, _master_dimension: usize, _dimension: usize, _slaved: bool) {
    }

    /// Re-derive the owner's aggregate "has animation" flag
    fn update_has_animation(&self) {}

    /// The logical or display range of some dimensions changed
    fn range_changed(&self, _knob: &str, _dimension: DimSpec) {}

    /// At least one dimension's modification status flipped. Fired once per
    /// recomputation, never once per dimension.
    fn modifications_changed(&self, _knob: &str) {}

    /// The animation level of a dimension/view was refreshed
    fn animation_level_changed(&self, _knob: &str, _view: ViewIdx, _dimension: usize, _level: AnimationLevel) {
    }
}

/// One keyframe of an animation curve, with the value already converted to
/// the curve's numeric domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyFrame {
    pub time: f64,
    pub value: f64,
}

impl KeyFrame {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

/// An opaque, externally implemented animation curve.
///
/// The engine never inspects interpolation; it samples, differentiates and
/// integrates through this interface and enumerates keyframes for hashing.
pub trait AnimationCurve: Send + Sync {
    /// Number of keyframes on the curve
    fn keyframes_count(&self) -> usize;

    /// Whether the curve animates the value (at least one keyframe)
    fn is_animated(&self) -> bool {
        self.keyframes_count() > 0
    }

    /// Interpolated value at `time`
    fn value_at(&self, time: f64) -> f64;

    /// Analytic derivative at `time`
    fn derivative_at(&self, time: f64) -> f64;

    /// Analytic definite integral over `[time1, time2]`
    fn integrate(&self, time1: f64, time2: f64) -> f64;

    /// Keyframe enumeration, ordered by time, for cache-hash fingerprints
    fn keyframes(&self) -> Vec<KeyFrame>;
}

/// Reproducible random facility exposed to expressions.
///
/// The engine reseeds this from `(time, dimension)` before every evaluator
/// call so that expressions consuming random numbers are deterministic.
pub trait ExpressionRandom {
    /// Uniform random double in `[min, max)`
    fn random(&self, min: f64, max: f64) -> f64;

    /// Uniform random integer in `[min, max)`
    fn random_int(&self, min: i64, max: i64) -> i64;
}

/// The external scripting evaluator.
///
/// Calls are serialized system-wide by [`crate::script::ScriptEngine`]; an
/// implementation may assume it is never entered concurrently through the
/// same engine.
pub trait ExpressionEvaluator: Send + Sync {
    /// Run `expression` for the given frame/view/dimension and return the
    /// dynamically-typed result, or a diagnostic message on failure.
    fn execute(
        &self,
        rng: &dyn ExpressionRandom,
        expression: &str,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<ScriptValue, String>;
}

/// String-interpolation collaborator for string-typed knobs.
///
/// Maps between keyframe indices/values and interpolated text.
pub trait StringInterpolator: Send + Sync {
    /// Text for the keyframe at `index` in the given view
    fn string_from_interpolated_value(&self, index: usize, view: ViewIdx) -> String;

    /// Numeric keyframe value for the given text inserted at `time`
    fn string_to_key_frame_value(&self, time: f64, view: ViewIdx, text: &str) -> f64;

    /// Every interpolated string sample, across all views, ordered by
    /// (view, time); used for animation-aware hashing
    fn keyframe_strings(&self) -> Vec<(ViewIdx, f64, String)>;

    /// Drop all string animation (called when a knob resets to default)
    fn reset(&self) {}
}

/// Append-only cache-identity digest accumulator.
///
/// The byte layout is the sink's contract; the engine only guarantees call
/// order and content.
pub trait HashSink {
    fn append_bool(&mut self, v: bool);
    fn append_i32(&mut self, v: i32);
    fn append_f64(&mut self, v: f64);
    fn append_str(&mut self, v: &str);
}

/// Policy hook deciding how a spatial double knob's default value maps into
/// the current coordinate system when it is restored.
///
/// When no policy is installed the default is used as-is (the "no frame
/// geometry available" fallback).
pub trait DenormalizePolicy: Send + Sync {
    /// Convert the stored default `value` of `dimension` for use at `time`
    fn denormalize_default(&self, dimension: usize, time: f64, value: f64) -> f64;
}

/// A holder that declares views and ignores every notification. Useful as a
/// placeholder owner for free-standing knobs.
#[derive(Debug, Clone, Default)]
pub struct DetachedHolder {
    views: Vec<ViewIdx>,
}

impl DetachedHolder {
    pub fn new() -> Self {
        Self { views: vec![ViewIdx::MAIN] }
    }

    /// Declare the given views in addition to the main view
    pub fn with_views(views: Vec<ViewIdx>) -> Self {
        let mut all = vec![ViewIdx::MAIN];
        for v in views {
            if !all.contains(&v) {
                all.push(v);
            }
        }
        Self { views: all }
    }
}

impl KnobHolder for DetachedHolder {
    fn views_list(&self) -> Vec<ViewIdx> {
        self.views.clone()
    }
}
