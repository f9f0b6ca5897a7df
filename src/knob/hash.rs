//! Cache-identity hashing
//!
//! A knob contributes to the owning node's render-cache hash. The cheap
//! strategy appends the resolved value at the hashed frame; the
//! animation-aware strategy fingerprints whole curves so that editing any
//! keyframe invalidates cached frames, not just the edited one.

use crate::error::KnobError;
use crate::traits::HashSink;
use crate::types::{HashingStrategy, ValueKind, ViewIdx};
use crate::value::KnobValue;

use super::Knob;

impl<T: KnobValue> Knob<T> {
    /// Append this knob's contribution for the given frame/view to a digest
    pub fn append_to_hash(
        &self,
        time: f64,
        view: ViewIdx,
        sink: &mut dyn HashSink,
    ) -> Result<(), KnobError> {
        let strategy = self.hashing_strategy();
        for dimension in 0..self.dimensions() {
            if strategy == HashingStrategy::AnimationAware
                && self.is_animated(dimension, view)?
            {
                if T::KIND == ValueKind::String {
                    if let Some(strings) = self.string_interpolator() {
                        // Every interpolated string, across all views
                        for (_view, _time, text) in strings.keyframe_strings() {
                            sink.append_str(&text);
                        }
                        continue;
                    }
                }
                if let Some(curve) = self.get_curve(dimension, view)? {
                    for key in curve.keyframes() {
                        sink.append_f64(key.time);
                        sink.append_f64(key.value);
                    }
                    continue;
                }
            }
            let value = self.get_value_at_time(time, dimension, view)?;
            value.append_to_digest(sink);
        }
        Ok(())
    }
}
