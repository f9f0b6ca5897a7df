//! Typed, animatable parameters ("knobs") for node-based compositing graphs.
//!
//! A [`Knob`] stores one value per (dimension, view) cell and resolves reads
//! through a fixed priority chain: an attached expression wins, then a
//! master link, then an animation curve, then the raw stored value. On top
//! of the store the engine provides clamped ranges, default values with
//! reset, master/slave links with a central registry, per-frame expression
//! memoization with a deterministic random facility, keyframe-aware cache
//! hashing, derivatives and definite integrals, cross-kind cloning and
//! batched change notifications.
//!
//! The engine owns no scene data: the owning node, animation curves, the
//! scripting evaluator and the digest are injected through the traits in
//! [`traits`].
//!
//! ```
//! use std::sync::Arc;
//! use knob_engine::{
//!     DetachedHolder, DimSpec, Knob, KnobHolder, LinkTable, ValueChangedReason, ViewIdx,
//!     ViewSetSpec,
//! };
//!
//! let holder: Arc<dyn KnobHolder> = Arc::new(DetachedHolder::new());
//! let links = LinkTable::new();
//! let size: Arc<Knob<f64>> = Knob::new("size", 2, &holder, links);
//!
//! size.set_range(0.0, 100.0, DimSpec::All).unwrap();
//! size.set_value(250.0, ViewSetSpec::All, DimSpec::All, ValueChangedReason::UserEdited)
//!     .unwrap();
//! assert_eq!(size.get_raw_value(0, ViewIdx::MAIN).unwrap(), 100.0);
//! ```

pub mod error;
pub mod knob;
pub mod links;
pub mod script;
pub mod traits;
pub mod transaction;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::KnobError;
pub use knob::Knob;
pub use links::{KnobId, LinkKey, LinkTable, MasterLink};
pub use script::{hash_function, ScriptEngine};
pub use traits::{
    AnimationCurve, DenormalizePolicy, DetachedHolder, ExpressionEvaluator, ExpressionRandom,
    HashSink, KeyFrame, KnobHolder, StringInterpolator,
};
pub use transaction::{ChangeBatch, ChangeScope, QueueOutcome};
pub use types::{
    AnimationLevel, DimSpec, HashingStrategy, ValueChange, ValueChangedReason, ValueKind, ViewIdx,
    ViewSetSpec,
};
pub use value::{KnobValue, ScriptValue};
