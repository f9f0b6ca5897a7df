//! Shared test doubles: a holder that records every notification, a
//! piecewise-linear curve, a scripted evaluator, a string table and a byte
//! digest sink.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::knob::Knob;
use crate::links::LinkTable;
use crate::traits::{
    AnimationCurve, ExpressionEvaluator, ExpressionRandom, HashSink, KeyFrame, KnobHolder,
    StringInterpolator,
};
use crate::transaction::{ChangeBatch, QueueOutcome};
use crate::types::{AnimationLevel, DimSpec, ValueChange, ViewIdx};
use crate::value::{KnobValue, ScriptValue};

/// Holder that logs every notification as a text event and implements the
/// transaction contract through a [`ChangeBatch`]
pub(crate) struct RecordingHolder {
    views: Vec<ViewIdx>,
    batch: ChangeBatch,
    events: Mutex<Vec<String>>,
}

impl RecordingHolder {
    pub fn new() -> Arc<Self> {
        Self::with_views(vec![ViewIdx::MAIN])
    }

    pub fn with_views(views: Vec<ViewIdx>) -> Arc<Self> {
        Arc::new(Self {
            views,
            batch: ChangeBatch::new(),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Build a knob owned by a fresh recording holder, on an existing link
    /// table so it can participate in links with other knobs
    pub fn knob_with_table<T: KnobValue>(
        name: &str,
        dimensions: usize,
        links: Arc<LinkTable<T>>,
    ) -> (Arc<Knob<T>>, Arc<RecordingHolder>) {
        let holder = RecordingHolder::new();
        let dyn_holder: Arc<dyn KnobHolder> = holder.clone();
        let knob = Knob::new(name, dimensions, &dyn_holder, links);
        (knob, holder)
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Number of recorded events starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl KnobHolder for RecordingHolder {
    fn views_list(&self) -> Vec<ViewIdx> {
        self.views.clone()
    }

    fn begin_changes(&self) {
        self.batch.begin();
    }

    fn end_changes(&self) {
        if let Some(pending) = self.batch.end() {
            self.push(format!("batch({})", pending.len()));
        }
    }

    fn append_value_change(&self, change: ValueChange) {
        match self.batch.queue(change) {
            QueueOutcome::DispatchNow(change) => self.push(format!("dispatch {}", change.knob)),
            QueueOutcome::Deferred => {}
        }
    }

    fn is_evaluation_blocked(&self) -> bool {
        self.batch.is_blocked()
    }

    fn on_knob_slaved(&self, knob: &str, _master_dimension: usize, dimension: usize, slaved: bool) {
        self.push(format!("slaved {} dim {} {}", knob, dimension, slaved));
    }

    fn update_has_animation(&self) {
        self.push("update_has_animation".to_string());
    }

    fn range_changed(&self, knob: &str, _dimension: DimSpec) {
        self.push(format!("range_changed {}", knob));
    }

    fn modifications_changed(&self, knob: &str) {
        self.push(format!("modifications_changed {}", knob));
    }

    fn animation_level_changed(
        &self,
        knob: &str,
        _view: ViewIdx,
        dimension: usize,
        level: AnimationLevel,
    ) {
        self.push(format!("animation_level {} dim {} {:?}", knob, dimension, level));
    }
}

/// A knob with a fresh link table, owned by a recording holder
pub(crate) fn new_knob<T: KnobValue>(
    name: &str,
    dimensions: usize,
) -> (Arc<Knob<T>>, Arc<RecordingHolder>) {
    RecordingHolder::knob_with_table(name, dimensions, LinkTable::new())
}

/// Piecewise-linear animation curve over a fixed keyframe list
pub(crate) struct TestCurve {
    keys: Vec<KeyFrame>,
}

impl TestCurve {
    pub fn new(keys: Vec<KeyFrame>) -> Self {
        Self { keys }
    }

    fn segment_at(&self, time: f64) -> Option<(&KeyFrame, &KeyFrame)> {
        self.keys
            .windows(2)
            .find(|w| w[0].time <= time && time <= w[1].time)
            .map(|w| (&w[0], &w[1]))
    }
}

impl AnimationCurve for TestCurve {
    fn keyframes_count(&self) -> usize {
        self.keys.len()
    }

    fn value_at(&self, time: f64) -> f64 {
        let Some(first) = self.keys.first() else { return 0.0 };
        let last = self.keys.last().unwrap();
        if time <= first.time {
            return first.value;
        }
        if time >= last.time {
            return last.value;
        }
        let (a, b) = self.segment_at(time).unwrap();
        let t = (time - a.time) / (b.time - a.time);
        a.value + t * (b.value - a.value)
    }

    fn derivative_at(&self, time: f64) -> f64 {
        match self.segment_at(time) {
            Some((a, b)) => (b.value - a.value) / (b.time - a.time),
            None => 0.0,
        }
    }

    fn integrate(&self, time1: f64, time2: f64) -> f64 {
        if time1 == time2 {
            return 0.0;
        }
        if time1 > time2 {
            return -self.integrate(time2, time1);
        }
        // Trapezoids between every breakpoint are exact for a linear curve
        let mut bounds = vec![time1];
        for k in &self.keys {
            if k.time > time1 && k.time < time2 {
                bounds.push(k.time);
            }
        }
        bounds.push(time2);
        bounds
            .windows(2)
            .map(|w| (w[1] - w[0]) * (self.value_at(w[0]) + self.value_at(w[1])) / 2.0)
            .sum()
    }

    fn keyframes(&self) -> Vec<KeyFrame> {
        self.keys.clone()
    }
}

type EvalFn = dyn Fn(&dyn ExpressionRandom, &str, f64, ViewIdx, usize) -> Result<ScriptValue, String>
    + Send
    + Sync;

/// Evaluator backed by a closure
pub(crate) struct ScriptedEvaluator {
    eval: Box<EvalFn>,
}

impl ScriptedEvaluator {
    pub fn new(
        eval: impl Fn(&dyn ExpressionRandom, &str, f64, ViewIdx, usize) -> Result<ScriptValue, String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self { eval: Box::new(eval) }
    }
}

impl ExpressionEvaluator for ScriptedEvaluator {
    fn execute(
        &self,
        rng: &dyn ExpressionRandom,
        expression: &str,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<ScriptValue, String> {
        (self.eval)(rng, expression, time, view, dimension)
    }
}

/// String table mapping keyframe indices to `entry-N` and text to its length
#[derive(Default)]
pub(crate) struct TestStrings {
    keyframes: Vec<(ViewIdx, f64, String)>,
}

impl TestStrings {
    pub fn with_keyframes(keyframes: Vec<(ViewIdx, f64, String)>) -> Self {
        Self { keyframes }
    }
}

impl StringInterpolator for TestStrings {
    fn string_from_interpolated_value(&self, index: usize, _view: ViewIdx) -> String {
        format!("entry-{}", index)
    }

    fn string_to_key_frame_value(&self, _time: f64, _view: ViewIdx, text: &str) -> f64 {
        text.len() as f64
    }

    fn keyframe_strings(&self) -> Vec<(ViewIdx, f64, String)> {
        self.keyframes.clone()
    }
}

/// Byte-accumulating digest sink with a stable 64-bit summary
#[derive(Default)]
pub(crate) struct DigestSink {
    bytes: Vec<u8>,
}

impl DigestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.bytes);
        hasher.finish()
    }
}

impl HashSink for DigestSink {
    fn append_bool(&mut self, v: bool) {
        self.bytes.push(v as u8);
    }

    fn append_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn append_f64(&mut self, v: f64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn append_str(&mut self, v: &str) {
        self.bytes.extend_from_slice(&(v.len() as u64).to_le_bytes());
        self.bytes.extend_from_slice(v.as_bytes());
    }
}
