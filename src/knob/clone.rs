//! State cloning between knobs
//!
//! Cloning powers unslave-with-copy and node duplication. Values cross
//! kinds through the variant interchange form with plain-cast semantics,
//! gated so that POD and string kinds never clone into each other.
//! Expressions are plain text and clone freely; curves are shared handles.

use std::sync::Arc;

use crate::traits::{KeyFrame, StringInterpolator};
use crate::transaction::ChangeScope;
use crate::types::{DimSpec, ValueChangedReason, ValueKind, ViewIdx, ViewSetSpec};
use crate::value::{KnobValue, ScriptValue};

use super::Knob;

impl<T: KnobValue> Knob<T> {
    fn paired_dimensions<U: KnobValue>(
        &self,
        other: &Knob<U>,
        dimension: DimSpec,
        other_dimension: DimSpec,
    ) -> Vec<(usize, usize)> {
        match (dimension, other_dimension) {
            (DimSpec::All, DimSpec::All) => {
                (0..self.dimensions().min(other.dimensions())).map(|d| (d, d)).collect()
            }
            (DimSpec::Index(d), DimSpec::Index(o)) => {
                if d < self.dimensions() && o < other.dimensions() {
                    vec![(d, o)]
                } else {
                    Vec::new()
                }
            }
            (DimSpec::Index(d), DimSpec::All) => {
                if d < self.dimensions() && d < other.dimensions() {
                    vec![(d, d)]
                } else {
                    Vec::new()
                }
            }
            (DimSpec::All, DimSpec::Index(o)) => {
                if o < self.dimensions() && o < other.dimensions() {
                    vec![(o, o)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn paired_views<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        other_view: ViewSetSpec,
    ) -> Vec<(ViewIdx, ViewIdx)> {
        match (view, other_view) {
            // Wildcards iterate the source's declared views
            (ViewSetSpec::All, ViewSetSpec::All) => {
                other.views_list().into_iter().map(|v| (v, v)).collect()
            }
            (ViewSetSpec::One(v), ViewSetSpec::All) => vec![(v, v)],
            (ViewSetSpec::All, ViewSetSpec::One(o)) => vec![(o, o)],
            (ViewSetSpec::One(v), ViewSetSpec::One(o)) => vec![(v, o)],
        }
    }

    /// Copy raw values from `other` through the variant interchange form.
    /// Silently skips when the kinds are not clone-compatible. Returns
    /// whether anything changed.
    pub fn clone_values<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        other_view: ViewSetSpec,
        dimension: DimSpec,
        other_dimension: DimSpec,
    ) -> bool {
        if T::KIND.is_pod() != U::KIND.is_pod() {
            return false;
        }
        let dims = self.paired_dimensions(other, dimension, other_dimension);
        let views = self.paired_views(other, view, other_view);

        let mut changed = false;
        for (d, od) in dims {
            for &(v, ov) in &views {
                let source = {
                    let other_state = other.state.lock();
                    other_state.values[od].get(&ov).cloned()
                };
                let Some(source) = source else { continue };
                let converted = T::from_variant(&source.to_variant());
                let mut state = self.state.lock();
                match state.values[d].get_mut(&v) {
                    Some(slot) => {
                        if *slot != converted {
                            *slot = converted;
                            changed = true;
                        }
                    }
                    None => {
                        state.values[d].insert(v, converted);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Copy expression text from `other`; memos of overwritten cells are
    /// dropped. Expressions are kind-agnostic.
    pub fn clone_expressions<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        other_view: ViewSetSpec,
        dimension: DimSpec,
        other_dimension: DimSpec,
    ) -> bool {
        let dims = self.paired_dimensions(other, dimension, other_dimension);
        let views = self.paired_views(other, view, other_view);

        let mut changed = false;
        for (d, od) in dims {
            for &(v, ov) in &views {
                let source = {
                    let other_state = other.state.lock();
                    other_state.expressions[od].get(&ov).cloned()
                };
                let mut state = self.state.lock();
                let current = state.expressions[d].get(&v).cloned();
                if current == source {
                    continue;
                }
                match source {
                    Some(text) => {
                        state.expressions[d].insert(v, text);
                    }
                    None => {
                        state.expressions[d].remove(&v);
                    }
                }
                state.expr_results[d].remove(&v);
                changed = true;
            }
        }
        changed
    }

    /// Copy memoized expression results from `other`, converting each value
    /// through the variant form. Cheap warm-start after cloning expressions.
    pub fn clone_expressions_results<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        other_view: ViewSetSpec,
        dimension: DimSpec,
        other_dimension: DimSpec,
    ) {
        if T::KIND.is_pod() != U::KIND.is_pod() {
            return;
        }
        let dims = self.paired_dimensions(other, dimension, other_dimension);
        let views = self.paired_views(other, view, other_view);

        for (d, od) in dims {
            for &(v, ov) in &views {
                let source = {
                    let other_state = other.state.lock();
                    other_state.expr_results[od].get(&ov).cloned()
                };
                let Some(source) = source else { continue };
                let converted = source
                    .into_iter()
                    .map(|(bits, value)| (bits, T::from_variant(&value.to_variant())))
                    .collect();
                self.state.lock().expr_results[d].insert(v, converted);
            }
        }
    }

    /// Share `other`'s animation curves. Curves are opaque handles, so a
    /// clone aliases the same curve rather than copying keyframes.
    pub fn clone_curves<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        other_view: ViewSetSpec,
        dimension: DimSpec,
        other_dimension: DimSpec,
    ) -> bool {
        let dims = self.paired_dimensions(other, dimension, other_dimension);
        let views = self.paired_views(other, view, other_view);

        let mut changed = false;
        for (d, od) in dims {
            for &(v, ov) in &views {
                let source = {
                    let other_state = other.state.lock();
                    other_state.curves[od].get(&ov).cloned()
                };
                let mut state = self.state.lock();
                match (source, state.curves[d].get(&v)) {
                    (Some(curve), Some(existing)) => {
                        if !Arc::ptr_eq(&curve, existing) {
                            state.curves[d].insert(v, curve);
                            changed = true;
                        }
                    }
                    (Some(curve), None) => {
                        state.curves[d].insert(v, curve);
                        changed = true;
                    }
                    (None, Some(_)) => {
                        state.curves[d].remove(&v);
                        changed = true;
                    }
                    (None, None) => {}
                }
            }
        }
        changed
    }

    /// Share kind-specific extra state: for string knobs, the string
    /// interpolation table handle
    pub fn clone_extra_data<U: KnobValue>(&self, other: &Knob<U>) -> bool {
        if T::KIND != ValueKind::String || U::KIND != ValueKind::String {
            return false;
        }
        let source = other.string_interpolator();
        let current = self.string_interpolator();
        let same = match (&source, &current) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return false;
        }
        if let Some(strings) = source {
            self.set_string_interpolator(strings);
        }
        true
    }

    /// Clone the full state of `other` into this knob: values, expressions
    /// and their memos, curves, and extra data, inside one change
    /// transaction with a single trailing notification. Returns whether
    /// anything changed. Cloning a knob into itself is a no-op.
    pub fn copy_knob<U: KnobValue>(
        &self,
        other: &Knob<U>,
        view: ViewSetSpec,
        dimension: DimSpec,
        other_view: ViewSetSpec,
        other_dimension: DimSpec,
    ) -> bool {
        if self.id() == other.id() {
            return false;
        }
        let holder = self.holder();
        let scope = holder.as_deref().map(ChangeScope::new);

        let mut changed = false;
        changed |= self.clone_values(other, view, other_view, dimension, other_dimension);
        changed |= self.clone_expressions(other, view, other_view, dimension, other_dimension);
        self.clone_expressions_results(other, view, other_view, dimension, other_dimension);
        changed |= self.clone_curves(other, view, other_view, dimension, other_dimension);
        changed |= self.clone_extra_data(other);

        if let Some(holder) = &holder {
            holder.update_has_animation();
        }
        self.compute_has_modifications();
        if changed {
            self.evaluate_value_change(dimension, view, ValueChangedReason::InternalEdited);
        }
        drop(scope);
        changed
    }

    /// Build a keyframe for inserting `value` at `time` on `view`.
    ///
    /// String values go through the interpolation table to obtain their
    /// numeric keyframe value; integers round half-up. A non-finite result
    /// is replaced by the knob's maximum so the curve stays well-formed.
    pub fn make_key_frame(&self, time: f64, value: &T, view: ViewIdx) -> KeyFrame {
        let numeric = match T::KIND {
            ValueKind::String => match (&self.string_interpolator(), value.to_variant()) {
                (Some(strings), ScriptValue::Str(text)) => {
                    keyframe_value_for_string(strings.as_ref(), time, view, &text)
                }
                _ => 0.0,
            },
            ValueKind::Int => (value.to_f64() + 0.5).floor(),
            ValueKind::Bool | ValueKind::Double => value.to_f64(),
        };
        if numeric.is_finite() {
            KeyFrame::new(time, numeric)
        } else {
            let ceiling = self
                .get_maximum(0)
                .map(|m| m.to_f64())
                .unwrap_or_else(|_| T::range_max().to_f64());
            KeyFrame::new(time, ceiling)
        }
    }
}

fn keyframe_value_for_string(
    strings: &dyn StringInterpolator,
    time: f64,
    view: ViewIdx,
    text: &str,
) -> f64 {
    strings.string_to_key_frame_value(time, view, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_knob, TestCurve, TestStrings};
    use crate::traits::KeyFrame;

    #[test]
    fn test_clone_values_same_kind() {
        let (a, _h1) = new_knob::<f64>("a", 2);
        let (b, _h2) = new_knob::<f64>("b", 2);
        b.set_value(1.5, ViewSetSpec::All, DimSpec::Index(0), ValueChangedReason::UserEdited)
            .unwrap();
        b.set_value(2.5, ViewSetSpec::All, DimSpec::Index(1), ValueChangedReason::UserEdited)
            .unwrap();

        assert!(a.clone_values(&b, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
        assert_eq!(a.get_raw_value(0, ViewIdx::MAIN).unwrap(), 1.5);
        assert_eq!(a.get_raw_value(1, ViewIdx::MAIN).unwrap(), 2.5);
        // Cloning again is a no-change
        assert!(!a.clone_values(&b, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
    }

    #[test]
    fn test_clone_values_cross_kind_truncates() {
        let (ints, _h1) = new_knob::<i32>("ints", 1);
        let (doubles, _h2) = new_knob::<f64>("doubles", 1);
        doubles
            .set_value(2.9, ViewSetSpec::All, DimSpec::Index(0), ValueChangedReason::UserEdited)
            .unwrap();

        assert!(ints.clone_values(&doubles, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
        // Plain-cast semantics: 2.9 truncates to 2, it does not round
        assert_eq!(ints.get_raw_value(0, ViewIdx::MAIN).unwrap(), 2);
    }

    #[test]
    fn test_clone_values_pod_string_gate() {
        let (strings, _h1) = new_knob::<String>("s", 1);
        let (doubles, _h2) = new_knob::<f64>("d", 1);
        doubles
            .set_value(7.0, ViewSetSpec::All, DimSpec::Index(0), ValueChangedReason::UserEdited)
            .unwrap();

        assert!(!strings.clone_values(&doubles, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
        assert_eq!(strings.get_raw_value(0, ViewIdx::MAIN).unwrap(), "");
    }

    #[test]
    fn test_clone_single_dimension_pairing() {
        let (a, _h1) = new_knob::<f64>("a", 2);
        let (b, _h2) = new_knob::<f64>("b", 2);
        b.set_value(9.0, ViewSetSpec::All, DimSpec::Index(1), ValueChangedReason::UserEdited)
            .unwrap();

        assert!(a.clone_values(
            &b,
            ViewSetSpec::All,
            ViewSetSpec::All,
            DimSpec::Index(0),
            DimSpec::Index(1)
        ));
        assert_eq!(a.get_raw_value(0, ViewIdx::MAIN).unwrap(), 9.0);
        assert_eq!(a.get_raw_value(1, ViewIdx::MAIN).unwrap(), 0.0);
    }

    #[test]
    fn test_clone_curves_shares_handles() {
        let (a, _h1) = new_knob::<f64>("a", 1);
        let (b, _h2) = new_knob::<f64>("b", 1);
        let curve = std::sync::Arc::new(TestCurve::new(vec![
            KeyFrame::new(0.0, 1.0),
            KeyFrame::new(10.0, 2.0),
        ]));
        b.set_curve(0, ViewIdx::MAIN, curve.clone()).unwrap();

        assert!(a.clone_curves(&b, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
        let cloned = a.get_curve(0, ViewIdx::MAIN).unwrap().unwrap();
        assert!(std::sync::Arc::ptr_eq(&cloned, &(curve as std::sync::Arc<dyn crate::traits::AnimationCurve>)));
        // Same handle again is a no-change
        assert!(!a.clone_curves(&b, ViewSetSpec::All, ViewSetSpec::All, DimSpec::All, DimSpec::All));
    }

    #[test]
    fn test_copy_knob_full_state() {
        let (a, holder) = new_knob::<f64>("a", 1);
        let (b, _h2) = new_knob::<f64>("b", 1);
        b.set_value(4.0, ViewSetSpec::All, DimSpec::Index(0), ValueChangedReason::UserEdited)
            .unwrap();
        b.set_expression(0, ViewIdx::MAIN, "frame + 1").unwrap();
        holder.clear_events();

        assert!(a.copy_knob(&b, ViewSetSpec::All, DimSpec::All, ViewSetSpec::All, DimSpec::All));
        assert_eq!(a.get_raw_value(0, ViewIdx::MAIN).unwrap(), 4.0);
        assert_eq!(a.get_expression(0, ViewIdx::MAIN).unwrap().unwrap(), "frame + 1");
        // The whole clone ran inside one transaction and queued one change
        assert_eq!(holder.count("batch(1)"), 1);

        // Self-clone and repeat-clone are no-ops
        assert!(!a.copy_knob(&a, ViewSetSpec::All, DimSpec::All, ViewSetSpec::All, DimSpec::All));
        assert!(!a.copy_knob(&b, ViewSetSpec::All, DimSpec::All, ViewSetSpec::All, DimSpec::All));
    }

    #[test]
    fn test_copy_knob_warm_starts_memo() {
        use crate::script::ScriptEngine;
        use crate::test_support::ScriptedEvaluator;
        use crate::value::ScriptValue;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let engine = ScriptEngine::new(Arc::new(ScriptedEvaluator::new(move |_r, _e, t, _v, _d| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptValue::Float(t))
        })));

        let (a, _h1) = new_knob::<f64>("a", 1);
        let (b, _h2) = new_knob::<f64>("b", 1);
        a.set_script_engine(engine.clone());
        b.set_script_engine(engine);
        b.set_expression(0, ViewIdx::MAIN, "frame").unwrap();
        let _ = b.get_value_at_time(7.0, 0, ViewIdx::MAIN).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        a.copy_knob(&b, ViewSetSpec::All, DimSpec::All, ViewSetSpec::All, DimSpec::All);
        // The memo came along, so the copied frame needs no evaluation
        assert_eq!(a.get_value_at_time(7.0, 0, ViewIdx::MAIN).unwrap(), 7.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_make_key_frame_numeric_kinds() {
        let (doubles, _h1) = new_knob::<f64>("d", 1);
        let k = doubles.make_key_frame(3.0, &1.25, ViewIdx::MAIN);
        assert_eq!(k, KeyFrame::new(3.0, 1.25));

        let (ints, _h2) = new_knob::<i32>("i", 1);
        let k = ints.make_key_frame(0.0, &7, ViewIdx::MAIN);
        assert_eq!(k.value, 7.0);

        let (bools, _h3) = new_knob::<bool>("b", 1);
        assert_eq!(bools.make_key_frame(0.0, &true, ViewIdx::MAIN).value, 1.0);
    }

    #[test]
    fn test_make_key_frame_clamps_non_finite() {
        let (doubles, _h) = new_knob::<f64>("d", 1);
        doubles.set_range(0.0, 100.0, DimSpec::All).unwrap();
        let k = doubles.make_key_frame(1.0, &f64::INFINITY, ViewIdx::MAIN);
        assert_eq!(k.value, 100.0);
        let k = doubles.make_key_frame(1.0, &f64::NAN, ViewIdx::MAIN);
        assert_eq!(k.value, 100.0);
    }

    #[test]
    fn test_make_key_frame_string_through_table() {
        let (strings, _h) = new_knob::<String>("s", 1);
        strings.set_string_interpolator(std::sync::Arc::new(TestStrings::default()));
        let k = strings.make_key_frame(2.0, &"hello".to_string(), ViewIdx::MAIN);
        // TestStrings maps text to its length
        assert_eq!(k.value, 5.0);

        let (bare, _h2) = new_knob::<String>("bare", 1);
        assert_eq!(bare.make_key_frame(2.0, &"hello".to_string(), ViewIdx::MAIN).value, 0.0);
    }

    #[test]
    fn test_clone_default_values() {
        let (a, _h1) = new_knob::<i32>("a", 2);
        let (b, _h2) = new_knob::<i32>("b", 2);
        b.set_default_value_without_applying(3, DimSpec::Index(0)).unwrap();

        a.clone_default_values(&b);
        assert_eq!(a.get_default_value(0).unwrap(), 3);
        assert!(a.is_default_value_set(0).unwrap());
        // Dimension 1 had no default set on the source
        assert!(!a.is_default_value_set(1).unwrap());
    }
}
