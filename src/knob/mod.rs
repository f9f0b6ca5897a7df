//! The knob core
//!
//! A [`Knob`] is a typed, possibly multi-dimensional, multi-view, animatable
//! attribute of a graph node. Each (dimension, view) cell resolves through a
//! fixed priority chain at read time: expression, then master link, then
//! animation curve, then the raw stored value.
//!
//! Locking follows the locked-core convention: public entry points acquire
//! the value mutex (or the range lock) exactly once, and no lock is ever
//! held across a scripting call or a holder notification.

mod calculus;
mod clone;
mod expression;
mod hash;
mod range;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::KnobError;
use crate::links::{KnobId, LinkKey, LinkTable, MasterLink};
use crate::script::ScriptEngine;
use crate::traits::{
    AnimationCurve, DenormalizePolicy, KnobHolder, StringInterpolator,
};
use crate::transaction::ChangeScope;
use crate::types::{
    AnimationLevel, DimSpec, HashingStrategy, ValueChange, ValueChangedReason, ValueKind, ViewIdx,
    ViewSetSpec,
};
use crate::value::{KnobValue, ScriptValue};

pub(crate) use range::RangeState;

/// Memoized expression results for one (dimension, view), keyed by the bit
/// pattern of the frame time
pub(crate) type FrameValueMap<T> = HashMap<u64, T>;

/// Default-value record of one dimension
#[derive(Debug, Clone)]
pub(crate) struct DefaultValue<T> {
    /// Live default; the plugin may change it at runtime
    pub value: T,
    /// Captured by the first default ever set, used to detect default drift
    pub initial_value: T,
    /// Distinguishes "never configured" from "explicitly set to zero"
    pub is_set: bool,
}

/// State guarded by the value mutex
pub(crate) struct ValueState<T: KnobValue> {
    pub values: Vec<HashMap<ViewIdx, T>>,
    pub defaults: Vec<DefaultValue<T>>,
    pub expressions: Vec<HashMap<ViewIdx, String>>,
    pub expr_results: Vec<HashMap<ViewIdx, FrameValueMap<T>>>,
    pub curves: Vec<HashMap<ViewIdx, Arc<dyn AnimationCurve>>>,
    pub modified: Vec<HashMap<ViewIdx, bool>>,
    pub enabled: Vec<bool>,
}

impl<T: KnobValue> ValueState<T> {
    fn new(dimensions: usize) -> Self {
        let mut values = vec![HashMap::new(); dimensions];
        for per_view in &mut values {
            per_view.insert(ViewIdx::MAIN, T::zero());
        }
        Self {
            values,
            defaults: vec![
                DefaultValue {
                    value: T::zero(),
                    initial_value: T::zero(),
                    is_set: false,
                };
                dimensions
            ],
            expressions: vec![HashMap::new(); dimensions],
            expr_results: vec![HashMap::new(); dimensions],
            curves: vec![HashMap::new(); dimensions],
            modified: vec![HashMap::new(); dimensions],
            enabled: vec![true; dimensions],
        }
    }
}

/// A typed, animatable parameter of a graph node.
///
/// Construct through [`Knob::new`] and share as `Arc<Knob<T>>`; master/slave
/// links hold weak references into the shared [`LinkTable`].
pub struct Knob<T: KnobValue> {
    name: String,
    id: KnobId,
    dimensions: usize,
    holder: Weak<dyn KnobHolder>,
    links: Arc<LinkTable<T>>,
    state: Mutex<ValueState<T>>,
    range: RwLock<RangeState<T>>,
    hashing: RwLock<HashingStrategy>,
    rng: Mutex<StdRng>,
    script: RwLock<Option<ScriptEngine>>,
    strings: RwLock<Option<Arc<dyn StringInterpolator>>>,
    denormalize: RwLock<Option<Arc<dyn DenormalizePolicy>>>,
    extra_modifications: RwLock<Option<Arc<dyn Fn(usize, ViewIdx) -> bool + Send + Sync>>>,
    current_time: AtomicU64,
    evaluate_on_time_change: AtomicBool,
}

impl<T: KnobValue> Knob<T> {
    /// Create a knob with `dimensions` channels, populated with the type's
    /// zero value on the main view and unset defaults.
    pub fn new(
        name: impl Into<String>,
        dimensions: usize,
        holder: &Arc<dyn KnobHolder>,
        links: Arc<LinkTable<T>>,
    ) -> Arc<Self> {
        assert!(dimensions > 0, "a knob needs at least one dimension");
        Arc::new(Self {
            name: name.into(),
            id: KnobId::next(),
            dimensions,
            holder: Arc::downgrade(holder),
            links,
            state: Mutex::new(ValueState::new(dimensions)),
            range: RwLock::new(RangeState::new(dimensions)),
            hashing: RwLock::new(HashingStrategy::default()),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            script: RwLock::new(None),
            strings: RwLock::new(None),
            denormalize: RwLock::new(None),
            extra_modifications: RwLock::new(None),
            current_time: AtomicU64::new(0f64.to_bits()),
            evaluate_on_time_change: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> KnobId {
        self.id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The value kind of this knob
    pub fn kind(&self) -> ValueKind {
        T::KIND
    }

    /// The owning node, if it is still alive
    pub fn holder(&self) -> Option<Arc<dyn KnobHolder>> {
        self.holder.upgrade()
    }

    pub fn link_table(&self) -> &Arc<LinkTable<T>> {
        &self.links
    }

    /// Install the scripting engine used by expressions on this knob
    pub fn set_script_engine(&self, engine: ScriptEngine) {
        *self.script.write() = Some(engine);
    }

    /// Install the string-interpolation collaborator (string knobs only)
    pub fn set_string_interpolator(&self, strings: Arc<dyn StringInterpolator>) {
        *self.strings.write() = Some(strings);
    }

    pub fn string_interpolator(&self) -> Option<Arc<dyn StringInterpolator>> {
        self.strings.read().clone()
    }

    /// Install the spatial-default policy applied when restoring defaults
    /// on double knobs
    pub fn set_denormalize_policy(&self, policy: Arc<dyn DenormalizePolicy>) {
        *self.denormalize.write() = Some(policy);
    }

    /// Install a type-specific extra modification check, consulted by
    /// [`compute_has_modifications`](Self::compute_has_modifications)
    pub fn set_extra_modifications_check(
        &self,
        check: Arc<dyn Fn(usize, ViewIdx) -> bool + Send + Sync>,
    ) {
        *self.extra_modifications.write() = Some(check);
    }

    pub fn set_hashing_strategy(&self, strategy: HashingStrategy) {
        *self.hashing.write() = strategy;
    }

    pub fn hashing_strategy(&self) -> HashingStrategy {
        *self.hashing.read()
    }

    /// Timeline position, maintained by the owner
    pub fn set_current_time(&self, time: f64) {
        self.current_time.store(time.to_bits(), Ordering::Relaxed);
    }

    pub fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time.load(Ordering::Relaxed))
    }

    /// Make timeline moves dispatch a value change even without animation.
    /// File-style knobs use this: the plugin must re-read when the frame
    /// changes although no value animates.
    pub fn set_evaluate_on_time_change(&self, enabled: bool) {
        self.evaluate_on_time_change.store(enabled, Ordering::Relaxed);
    }

    pub fn evaluate_on_time_change(&self) -> bool {
        self.evaluate_on_time_change.load(Ordering::Relaxed)
    }

    /// The timeline moved to `time`. Stores the new time; when any
    /// dimension is animated, re-derives the animation levels and reports
    /// one `TimeChanged` value change (queued while evaluation is blocked).
    /// Knobs flagged with [`set_evaluate_on_time_change`](Self::set_evaluate_on_time_change)
    /// also dispatch, except during playback where re-evaluation is already
    /// implied.
    pub fn on_time_changed(&self, is_playback: bool, time: f64) {
        self.set_current_time(time);

        let animated = (0..self.dimensions)
            .any(|d| matches!(self.is_animated(d, ViewIdx::MAIN), Ok(true)));
        if animated {
            for d in 0..self.dimensions {
                self.refresh_animation_level(ViewIdx::MAIN, d);
            }
        }
        if animated || (self.evaluate_on_time_change() && !is_playback) {
            self.evaluate_value_change(
                DimSpec::All,
                ViewSetSpec::One(ViewIdx::MAIN),
                ValueChangedReason::TimeChanged,
            );
        }
    }

    /// Views declared by the owner; the store never invents views on its own
    pub fn views_list(&self) -> Vec<ViewIdx> {
        match self.holder() {
            Some(holder) => holder.views_list(),
            None => vec![ViewIdx::MAIN],
        }
    }

    pub(crate) fn check_dimension(&self, dimension: usize) -> Result<(), KnobError> {
        if dimension >= self.dimensions {
            return Err(KnobError::bad_dimension(dimension, self.dimensions));
        }
        Ok(())
    }

    fn target_dimensions(&self, dimension: DimSpec) -> Result<Vec<usize>, KnobError> {
        match dimension {
            DimSpec::All => Ok((0..self.dimensions).collect()),
            DimSpec::Index(i) => {
                self.check_dimension(i)?;
                Ok(vec![i])
            }
        }
    }

    fn target_views(&self, view: ViewSetSpec) -> Vec<ViewIdx> {
        match view {
            ViewSetSpec::All => self.views_list(),
            ViewSetSpec::One(v) => vec![v],
        }
    }

    /// Resolve a requested view to the view actually holding state for the
    /// dimension; an unsplit view falls back to the main view.
    fn resolve_view_locked(state: &ValueState<T>, dimension: usize, view: ViewIdx) -> ViewIdx {
        if state.values[dimension].contains_key(&view)
            || state.expressions[dimension].contains_key(&view)
            || state.curves[dimension].contains_key(&view)
        {
            view
        } else {
            ViewIdx::MAIN
        }
    }

    // ---- value store -------------------------------------------------------

    /// The raw stored value, ignoring expressions, links and animation.
    /// A view with no stored entry reads as the type's zero value.
    pub fn get_raw_value(&self, dimension: usize, view: ViewIdx) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        let state = self.state.lock();
        Ok(state.values[dimension]
            .get(&view)
            .cloned()
            .unwrap_or_else(T::zero))
    }

    /// Snapshot of the whole raw store
    pub fn get_raw_values(&self) -> Vec<HashMap<ViewIdx, T>> {
        self.state.lock().values.clone()
    }

    /// Write a value through the normal change path: clamp, store, refresh
    /// modification flags, notify. Returns whether anything changed.
    pub fn set_value(
        &self,
        value: T,
        view: ViewSetSpec,
        dimension: DimSpec,
        reason: ValueChangedReason,
    ) -> Result<bool, KnobError> {
        let dims = self.target_dimensions(dimension)?;
        let views = self.target_views(view);

        // Clamp outside the value mutex; the range lock is never nested
        // inside it on this path.
        let mut clamped = Vec::with_capacity(dims.len());
        for &d in &dims {
            clamped.push(self.clamp_to_min_max(value.clone(), d)?);
        }

        let mut changed = false;
        {
            let mut state = self.state.lock();
            for (&d, v) in dims.iter().zip(&clamped) {
                for &view in &views {
                    match state.values[d].get_mut(&view) {
                        Some(slot) => {
                            if slot != v {
                                *slot = v.clone();
                                changed = true;
                            }
                        }
                        None => {
                            state.values[d].insert(view, v.clone());
                            changed = true;
                        }
                    }
                }
            }
        }

        self.compute_has_modifications();
        self.evaluate_value_change(dimension, view, reason);
        Ok(changed)
    }

    /// Batch-write one value per dimension starting at `start_dimension`,
    /// with a single coalesced notification.
    pub fn set_values_across_dimensions(
        &self,
        values: &[T],
        start_dimension: usize,
        view: ViewSetSpec,
        reason: ValueChangedReason,
    ) -> Result<(), KnobError> {
        if values.is_empty() {
            return Ok(());
        }
        let end = start_dimension + values.len();
        if end > self.dimensions {
            return Err(KnobError::bad_dimension(end - 1, self.dimensions));
        }
        let views = self.target_views(view);

        let mut clamped = Vec::with_capacity(values.len());
        for (offset, v) in values.iter().enumerate() {
            clamped.push(self.clamp_to_min_max(v.clone(), start_dimension + offset)?);
        }

        {
            let mut state = self.state.lock();
            for (offset, v) in clamped.iter().enumerate() {
                let d = start_dimension + offset;
                for &view in &views {
                    state.values[d].insert(view, v.clone());
                }
            }
        }

        self.compute_has_modifications();
        self.evaluate_value_change(DimSpec::All, view, reason);
        Ok(())
    }

    /// Resolving read: expression, then master link, then animation curve,
    /// then the raw stored value.
    pub fn get_value_at_time(
        &self,
        time: f64,
        dimension: usize,
        view: ViewIdx,
    ) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;

        let (view, expr, cached) = {
            let state = self.state.lock();
            let view = Self::resolve_view_locked(&state, dimension, view);
            let expr = state.expressions[dimension]
                .get(&view)
                .filter(|e| !e.is_empty())
                .cloned();
            let cached = state.expr_results[dimension]
                .get(&view)
                .and_then(|m| m.get(&time.to_bits()))
                .cloned();
            (view, expr, cached)
        };

        if expr.is_some() {
            if let Some(cached) = cached {
                return Ok(cached);
            }
            let value = self.evaluate_expression(time, view, dimension)?;
            let mut state = self.state.lock();
            state.expr_results[dimension]
                .entry(view)
                .or_default()
                .insert(time.to_bits(), value.clone());
            return Ok(value);
        }

        let key = LinkKey { knob: self.id, dimension, view };
        if let Some(link) = self.links.master_of(&key) {
            if let Some(master) = link.master.upgrade() {
                return master.get_value_at_time(time, link.dimension, link.view);
            }
        }

        let curve = { self.state.lock().curves[dimension].get(&view).cloned() };
        if let Some(curve) = curve {
            if curve.keyframes_count() > 0 {
                let sample = curve.value_at(time);
                let strings = self.strings.read().clone();
                return Ok(T::from_script(
                    &ScriptValue::Float(sample),
                    view,
                    strings.as_deref(),
                ));
            }
        }

        let state = self.state.lock();
        Ok(state.values[dimension]
            .get(&view)
            .cloned()
            .unwrap_or_else(T::zero))
    }

    /// Bake the resolved value at the current time back into the raw store.
    /// Only views that already hold an entry are updated.
    pub fn copy_values_from_curve(
        &self,
        dimension: DimSpec,
        view: ViewSetSpec,
    ) -> Result<(), KnobError> {
        let time = self.current_time();
        let dims = self.target_dimensions(dimension)?;
        let views = self.target_views(view);
        for d in dims {
            for &v in &views {
                let resolved = self.get_value_at_time(time, d, v)?;
                let mut state = self.state.lock();
                if let Some(slot) = state.values[d].get_mut(&v) {
                    *slot = resolved;
                }
            }
        }
        Ok(())
    }

    /// Duplicate the main view's values into per-view entries for `view`
    pub fn split_view(&self, view: ViewIdx) -> Result<(), KnobError> {
        if view.is_main() {
            return Ok(());
        }
        let mut state = self.state.lock();
        for d in 0..self.dimensions {
            let main = state.values[d]
                .get(&ViewIdx::MAIN)
                .cloned()
                .unwrap_or_else(T::zero);
            state.values[d].insert(view, main);
        }
        Ok(())
    }

    /// Remove the per-view entries of `view`; reads fall back to the main view
    pub fn unsplit_view(&self, view: ViewIdx) -> Result<(), KnobError> {
        if view.is_main() {
            return Err(KnobError::ViewNotFound(view));
        }
        let mut state = self.state.lock();
        for d in 0..self.dimensions {
            state.values[d].remove(&view);
            state.expressions[d].remove(&view);
            state.expr_results[d].remove(&view);
            state.curves[d].remove(&view);
            state.modified[d].remove(&view);
        }
        Ok(())
    }

    // ---- defaults / reset --------------------------------------------------

    pub fn get_default_value(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().defaults[dimension].value.clone())
    }

    pub fn get_initial_default_value(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().defaults[dimension].initial_value.clone())
    }

    pub fn is_default_value_set(&self, dimension: usize) -> Result<bool, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().defaults[dimension].is_set)
    }

    /// Whether the live default drifted away from the initial default
    pub fn has_default_value_changed(&self, dimension: usize) -> Result<bool, KnobError> {
        self.check_dimension(dimension)?;
        let state = self.state.lock();
        Ok(state.defaults[dimension].initial_value != state.defaults[dimension].value)
    }

    /// Re-baseline: adopt the live defaults as the initial defaults
    pub fn set_current_default_value_as_initial_value(&self) {
        let mut state = self.state.lock();
        for d in &mut state.defaults {
            d.initial_value = d.value.clone();
            d.is_set = true;
        }
    }

    fn write_default_locked(slot: &mut DefaultValue<T>, value: &T) {
        slot.value = value.clone();
        if !slot.is_set {
            // First default wins the initial baseline
            slot.is_set = true;
            slot.initial_value = value.clone();
        }
    }

    /// Set the default and apply it (resets the targeted dimensions on all
    /// views through the normal value path)
    pub fn set_default_value(&self, value: T, dimension: DimSpec) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        {
            let mut state = self.state.lock();
            for &d in &dims {
                Self::write_default_locked(&mut state.defaults[d], &value);
            }
        }
        self.reset_to_default_value(dimension, ViewSetSpec::All)?;
        self.compute_has_modifications();
        Ok(())
    }

    /// Set the default without touching the current value
    pub fn set_default_value_without_applying(
        &self,
        value: T,
        dimension: DimSpec,
    ) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        {
            let mut state = self.state.lock();
            for &d in &dims {
                Self::write_default_locked(&mut state.defaults[d], &value);
            }
        }
        self.compute_has_modifications();
        Ok(())
    }

    /// Batch form of [`set_default_value_without_applying`](Self::set_default_value_without_applying)
    pub fn set_default_values_without_applying(
        &self,
        values: &[T],
        start_dimension: usize,
    ) -> Result<(), KnobError> {
        if values.is_empty() {
            return Ok(());
        }
        let end = start_dimension + values.len();
        if end > self.dimensions {
            return Err(KnobError::bad_dimension(end - 1, self.dimensions));
        }
        {
            let mut state = self.state.lock();
            for (offset, v) in values.iter().enumerate() {
                Self::write_default_locked(&mut state.defaults[start_dimension + offset], v);
            }
        }
        self.compute_has_modifications();
        Ok(())
    }

    /// Copy set defaults from another knob of the same kind
    pub fn clone_default_values(&self, other: &Knob<T>) {
        let dims = self.dimensions.min(other.dimensions);
        let other_defaults = other.state.lock().defaults.clone();
        for (d, def) in other_defaults.into_iter().enumerate().take(dims) {
            if def.is_set {
                // Dimension indices are in range by construction
                let _ = self.set_default_value_without_applying(def.value, DimSpec::Index(d));
            }
        }
    }

    /// Drop the animation curves of the targeted dimensions/views
    pub fn remove_animation(
        &self,
        view: ViewSetSpec,
        dimension: DimSpec,
    ) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        let views = self.target_views(view);
        {
            let mut state = self.state.lock();
            for &d in &dims {
                for v in &views {
                    state.curves[d].remove(v);
                }
            }
        }
        if let Some(holder) = self.holder() {
            holder.update_has_animation();
        }
        Ok(())
    }

    /// Restore the default value: clears animation, expression and extra
    /// state first, then writes the default back through the normal value
    /// path so observers see an ordinary (reason-tagged) edit.
    pub fn reset_to_default_value(
        &self,
        dimension: DimSpec,
        view: ViewSetSpec,
    ) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;

        self.remove_animation(view, dimension)?;
        self.clear_expression(dimension, view)?;
        if T::KIND == ValueKind::String {
            if let Some(strings) = self.strings.read().clone() {
                strings.reset();
            }
        }

        let time = self.current_time();
        let mut defaults: Vec<T> = {
            let state = self.state.lock();
            dims.iter()
                .map(|&d| state.defaults[d].value.clone())
                .collect()
        };

        // Spatial doubles may need their default mapped into the current
        // coordinate system before it is applied.
        if T::KIND == ValueKind::Double {
            if let Some(policy) = self.denormalize.read().clone() {
                for (slot, &d) in defaults.iter_mut().zip(&dims) {
                    let mapped = policy.denormalize_default(d, time, slot.to_f64());
                    *slot = T::from_f64(mapped);
                }
            }
        }

        match dimension {
            DimSpec::All => self.set_values_across_dimensions(
                &defaults,
                0,
                view,
                ValueChangedReason::RestoreDefault,
            )?,
            DimSpec::Index(d) => {
                self.set_value(
                    defaults.remove(0),
                    view,
                    DimSpec::Index(d),
                    ValueChangedReason::RestoreDefault,
                )?;
            }
        }
        Ok(())
    }

    // ---- animation ---------------------------------------------------------

    /// Install an animation curve for (dimension, view)
    pub fn set_curve(
        &self,
        dimension: usize,
        view: ViewIdx,
        curve: Arc<dyn AnimationCurve>,
    ) -> Result<(), KnobError> {
        self.check_dimension(dimension)?;
        self.state.lock().curves[dimension].insert(view, curve);
        if let Some(holder) = self.holder() {
            holder.update_has_animation();
        }
        Ok(())
    }

    /// The curve for (dimension, view), falling back to the main view
    pub fn get_curve(
        &self,
        dimension: usize,
        view: ViewIdx,
    ) -> Result<Option<Arc<dyn AnimationCurve>>, KnobError> {
        self.check_dimension(dimension)?;
        let state = self.state.lock();
        Ok(state.curves[dimension]
            .get(&view)
            .or_else(|| state.curves[dimension].get(&ViewIdx::MAIN))
            .cloned())
    }

    /// Whether an installed curve animates the value
    pub fn is_animated(&self, dimension: usize, view: ViewIdx) -> Result<bool, KnobError> {
        Ok(self
            .get_curve(dimension, view)?
            .map(|c| c.is_animated())
            .unwrap_or(false))
    }

    /// Whether any dimension/view carries animation or an expression
    pub fn has_animation(&self) -> bool {
        let state = self.state.lock();
        for d in 0..self.dimensions {
            if state.curves[d].values().any(|c| c.is_animated()) {
                return true;
            }
            if state.expressions[d].values().any(|e| !e.is_empty()) {
                return true;
            }
        }
        false
    }

    /// Re-derive the animation level of (dimension, view) and report it to
    /// the owner
    pub fn refresh_animation_level(&self, view: ViewIdx, dimension: usize) {
        let Ok(()) = self.check_dimension(dimension) else {
            return;
        };
        let level = {
            let state = self.state.lock();
            let view = Self::resolve_view_locked(&state, dimension, view);
            if state.expressions[dimension]
                .get(&view)
                .is_some_and(|e| !e.is_empty())
            {
                AnimationLevel::Expression
            } else if state.curves[dimension]
                .get(&view)
                .is_some_and(|c| c.is_animated())
            {
                AnimationLevel::Interpolated
            } else {
                AnimationLevel::None
            }
        };
        if let Some(holder) = self.holder() {
            holder.animation_level_changed(&self.name, view, dimension, level);
        }
    }

    // ---- enabled flags -----------------------------------------------------

    pub fn set_enabled(&self, dimension: usize, enabled: bool) -> Result<(), KnobError> {
        self.check_dimension(dimension)?;
        self.state.lock().enabled[dimension] = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, dimension: usize) -> Result<bool, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().enabled[dimension])
    }

    // ---- links -------------------------------------------------------------

    /// Slave (dimension, view) to another knob's (dimension, view).
    ///
    /// The edge makes reads delegate to the master until [`Knob::unslave`].
    /// Keeping the link graph acyclic is the caller's responsibility; cycles
    /// are not detected here and will recurse on read.
    pub fn slave_to(
        &self,
        dimension: usize,
        view: ViewIdx,
        master: &Arc<Knob<T>>,
        master_dimension: usize,
        master_view: ViewIdx,
    ) -> Result<(), KnobError> {
        self.check_dimension(dimension)?;
        master.check_dimension(master_dimension)?;

        self.links.link(
            LinkKey { knob: self.id, dimension, view },
            MasterLink {
                master: Arc::downgrade(master),
                master_id: master.id,
                dimension: master_dimension,
                view: master_view,
            },
        );
        self.set_enabled(dimension, false)?;
        self.compute_has_modifications();
        if let Some(holder) = self.holder() {
            holder.on_knob_slaved(&self.name, master_dimension, dimension, true);
        }
        Ok(())
    }

    /// The master edge of (dimension, view), if any
    pub fn get_master(
        &self,
        dimension: usize,
        view: ViewIdx,
    ) -> Result<Option<MasterLink<T>>, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self
            .links
            .master_of(&LinkKey { knob: self.id, dimension, view }))
    }

    /// Every (knob, dimension, view) currently slaved to this knob
    pub fn listeners(&self) -> Vec<LinkKey> {
        self.links.listeners_of(self.id)
    }

    /// Sever the master edge of (dimension, view). A silent no-op when no
    /// edge exists. With `copy_state` the master's values, expressions and
    /// animation are copied over; without it the slave keeps whatever the
    /// link last resolved to — the pre-slave value is not restored.
    pub fn unslave(
        &self,
        dimension: usize,
        view: ViewIdx,
        reason: ValueChangedReason,
        copy_state: bool,
    ) -> Result<(), KnobError> {
        self.check_dimension(dimension)?;
        let key = LinkKey { knob: self.id, dimension, view };
        let Some(link) = self.links.unlink(&key) else {
            return Ok(());
        };
        trace!(
            "unslave {}[{}] view {:?} ({:?}, copy_state={})",
            self.name, dimension, view, reason, copy_state
        );

        self.set_enabled(dimension, true)?;

        let mut changed = false;
        if copy_state {
            if let Some(master) = link.master.upgrade() {
                changed = self.copy_knob(
                    &master,
                    ViewSetSpec::One(view),
                    DimSpec::Index(dimension),
                    ViewSetSpec::One(link.view),
                    DimSpec::Index(link.dimension),
                );
            }
        }

        if let Some(holder) = self.holder() {
            holder.on_knob_slaved(&self.name, link.dimension, dimension, false);
        }
        if !changed {
            // A no-op clone would otherwise leave a stale animation badge
            self.refresh_animation_level(view, dimension);
        }
        self.compute_has_modifications();
        Ok(())
    }

    // ---- modification tracking ---------------------------------------------

    /// Recompute the per-(dimension, view) modification flags and fire one
    /// coalesced notification if any flag flipped.
    pub fn compute_has_modifications(&self) {
        let views = self.views_list();

        // First pass under the lock: the four built-in checks.
        let mut flags: Vec<(usize, ViewIdx, bool)> = Vec::with_capacity(self.dimensions * views.len());
        {
            let state = self.state.lock();
            for d in 0..self.dimensions {
                for &view in &views {
                    let mut modified = state.expressions[d]
                        .get(&view)
                        .is_some_and(|e| !e.is_empty());
                    if !modified {
                        modified = state.curves[d].get(&view).is_some_and(|c| c.is_animated());
                    }
                    if !modified {
                        modified = self
                            .links
                            .master_of(&LinkKey { knob: self.id, dimension: d, view })
                            .is_some();
                    }
                    if !modified {
                        if let Some(v) = state.values[d].get(&view) {
                            modified = *v != state.defaults[d].value;
                        }
                    }
                    flags.push((d, view, modified));
                }
            }
        }

        // Second pass unlocked: the type-specific override may re-enter the
        // knob freely.
        if let Some(check) = self.extra_modifications.read().clone() {
            for (d, view, modified) in &mut flags {
                if !*modified {
                    *modified = check(*d, *view);
                }
            }
        }

        let mut one_changed = false;
        {
            let mut state = self.state.lock();
            for (d, view, modified) in flags {
                let previous = state.modified[d].insert(view, modified);
                if previous != Some(modified) {
                    one_changed = true;
                }
            }
        }

        if one_changed {
            if let Some(holder) = self.holder() {
                holder.modifications_changed(&self.name);
            }
        }
    }

    /// The cached modification flag of (dimension, view)
    pub fn has_modifications(&self, dimension: usize, view: ViewIdx) -> Result<bool, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().modified[dimension]
            .get(&view)
            .copied()
            .unwrap_or(false))
    }

    // ---- notifications -----------------------------------------------------

    /// Report a value change to the owner: queued while evaluation is
    /// blocked by an enclosing transaction, otherwise wrapped in a
    /// single-change scope.
    pub(crate) fn evaluate_value_change(
        &self,
        dimension: DimSpec,
        view: ViewSetSpec,
        reason: ValueChangedReason,
    ) {
        let Some(holder) = self.holder() else {
            return;
        };
        let change = ValueChange {
            knob: self.name.clone(),
            time: self.current_time(),
            view,
            dimension,
            reason,
        };
        if holder.is_evaluation_blocked() {
            holder.append_value_change(change);
        } else {
            let scope = ChangeScope::new(holder.as_ref());
            scope.append(change);
        }
    }
}

impl<T: KnobValue> Drop for Knob<T> {
    fn drop(&mut self) {
        // Only this knob's slave-side edges go with it. Edges held by
        // slaves of this knob stay in the table; their weak master handle
        // goes dead and their own unslave severs them.
        self.links.remove_edges_of(self.id);
    }
}

impl<T: KnobValue> std::fmt::Debug for Knob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Knob")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("dimensions", &self.dimensions)
            .field("kind", &T::KIND)
            .finish_non_exhaustive()
    }
}
