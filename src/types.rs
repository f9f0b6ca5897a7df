//! Core addressing and policy types
//!
//! Knob state is indexed along two axes: dimension (one scalar channel of a
//! multi-dimensional parameter, e.g. X of a 2D position) and view (one of
//! possibly several parallel value sets, e.g. stereo left/right). Most
//! mutating operations accept wildcard forms of both axes.

use serde::{Deserialize, Serialize};

/// Index of a view. View 0 is the implicit main view that always exists;
/// further views are declared by the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewIdx(pub u32);

impl ViewIdx {
    /// The main view, present on every knob
    pub const MAIN: ViewIdx = ViewIdx(0);

    /// Whether this is the main view
    pub fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ViewIdx {
    fn from(v: u32) -> Self {
        ViewIdx(v)
    }
}

/// Dimension addressing: a single dimension or all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimSpec {
    /// Every dimension of the knob
    All,
    /// One dimension by index
    Index(usize),
}

impl DimSpec {
    pub fn is_all(self) -> bool {
        matches!(self, DimSpec::All)
    }

    /// Whether the spec targets the given dimension index
    pub fn matches(self, dimension: usize) -> bool {
        match self {
            DimSpec::All => true,
            DimSpec::Index(i) => i == dimension,
        }
    }
}

impl From<usize> for DimSpec {
    fn from(i: usize) -> Self {
        DimSpec::Index(i)
    }
}

/// View addressing for mutations: a single view or all declared views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewSetSpec {
    /// Every declared view
    All,
    /// One view
    One(ViewIdx),
}

impl ViewSetSpec {
    pub fn is_all(self) -> bool {
        matches!(self, ViewSetSpec::All)
    }
}

impl From<ViewIdx> for ViewSetSpec {
    fn from(v: ViewIdx) -> Self {
        ViewSetSpec::One(v)
    }
}

/// The closed set of value kinds a knob can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Double,
    String,
}

impl ValueKind {
    /// Plain-old-data kinds can be converted between each other numerically;
    /// string content never crosses this boundary.
    pub fn is_pod(self) -> bool {
        !matches!(self, ValueKind::String)
    }
}

/// Why a value changed; carried through notifications so observers can
/// distinguish user edits from internal refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueChangedReason {
    /// Edited interactively by the user
    UserEdited,
    /// Edited programmatically by the plugin
    PluginEdited,
    /// Edited by the engine itself (clone, link refresh, ...)
    InternalEdited,
    /// Written back while restoring the default value
    RestoreDefault,
    /// Re-evaluated because the timeline moved
    TimeChanged,
}

/// Selects what a knob contributes to the cache-identity hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashingStrategy {
    /// Only the resolved value at the queried time
    #[default]
    Value,
    /// The full keyframe fingerprint for animated dimensions, so results
    /// that integrate over a time range invalidate when any keyframe moves
    AnimationAware,
}

/// Animation state of one dimension/view, reported to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationLevel {
    /// No animation and no expression
    None,
    /// Driven by an animation curve
    Interpolated,
    /// Driven by an expression
    Expression,
}

/// A pending value-change record, queued on the owner while an enclosing
/// change transaction blocks evaluation.
#[derive(Debug, Clone)]
pub struct ValueChange {
    /// Script-name of the knob that changed
    pub knob: String,
    /// Time the change applies to
    pub time: f64,
    /// Affected views
    pub view: ViewSetSpec,
    /// Affected dimensions
    pub dimension: DimSpec,
    /// Why it changed
    pub reason: ValueChangedReason,
}
