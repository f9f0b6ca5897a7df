//! Expression management
//!
//! An expression on a (dimension, view) drives the value with the highest
//! resolution priority. Evaluation goes through the shared [`ScriptEngine`]
//! token: seize the token, reseed the random facility from the frame time
//! and dimension, run the evaluator, coerce the result. Results are
//! memoized per frame and invalidated whenever the expression text changes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::KnobError;
use crate::script::{hash_function, seed_for};
use crate::traits::ExpressionRandom;
use crate::types::{DimSpec, ViewIdx, ViewSetSpec};
use crate::value::KnobValue;

use super::Knob;

impl<T: KnobValue> Knob<T> {
    /// Attach an expression to the targeted dimensions/views. Any memoized
    /// results for those cells are dropped.
    pub fn set_expression(
        &self,
        dimension: usize,
        view: ViewIdx,
        expression: impl Into<String>,
    ) -> Result<(), KnobError> {
        self.check_dimension(dimension)?;
        let expression = expression.into();
        {
            let mut state = self.state.lock();
            if expression.is_empty() {
                state.expressions[dimension].remove(&view);
            } else {
                state.expressions[dimension].insert(view, expression);
            }
            state.expr_results[dimension].remove(&view);
        }
        self.compute_has_modifications();
        self.refresh_animation_level(view, dimension);
        if let Some(holder) = self.holder() {
            holder.update_has_animation();
        }
        Ok(())
    }

    /// Remove the expressions of the targeted dimensions/views along with
    /// their memoized results. A no-op for cells without one.
    pub fn clear_expression(
        &self,
        dimension: DimSpec,
        view: ViewSetSpec,
    ) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        let views = self.target_views(view);
        let mut had_any = false;
        {
            let mut state = self.state.lock();
            for &d in &dims {
                for v in &views {
                    had_any |= state.expressions[d].remove(v).is_some();
                    state.expr_results[d].remove(v);
                }
            }
        }
        if had_any {
            self.compute_has_modifications();
            for &d in &dims {
                for &v in &views {
                    self.refresh_animation_level(v, d);
                }
            }
            if let Some(holder) = self.holder() {
                holder.update_has_animation();
            }
        }
        Ok(())
    }

    /// The expression text of (dimension, view), if one is attached
    pub fn get_expression(
        &self,
        dimension: usize,
        view: ViewIdx,
    ) -> Result<Option<String>, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.state.lock().expressions[dimension].get(&view).cloned())
    }

    /// Whether any dimension/view carries an expression
    pub fn has_expression(&self) -> bool {
        let state = self.state.lock();
        state.expressions.iter().any(|per_view| !per_view.is_empty())
    }

    /// Run the expression of (dimension, view) at `time` and coerce the
    /// result into the knob's kind. Bypasses the memo; the resolving read
    /// is the caller that memoizes.
    pub fn evaluate_expression(
        &self,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<T, KnobError> {
        let result = self.execute_expression(time, view, dimension)?;
        let strings = self.string_interpolator();
        Ok(T::from_script(&result, view, strings.as_deref()))
    }

    /// Like [`evaluate_expression`](Self::evaluate_expression) but collapses
    /// the result to a double through the POD fast path, skipping string
    /// interpolation entirely.
    pub fn evaluate_expression_pod(
        &self,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<f64, KnobError> {
        Ok(self.execute_expression(time, view, dimension)?.as_f64_lossy())
    }

    fn execute_expression(
        &self,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<crate::value::ScriptValue, KnobError> {
        self.check_dimension(dimension)?;
        let expression = self
            .state
            .lock()
            .expressions[dimension]
            .get(&view)
            .filter(|e| !e.is_empty())
            .cloned()
            .ok_or_else(|| KnobError::ExpressionFailed {
                dimension,
                message: "no expression attached".to_string(),
            })?;
        let engine = self
            .script
            .read()
            .clone()
            .ok_or_else(|| KnobError::ExpressionFailed {
                dimension,
                message: "no scripting engine installed".to_string(),
            })?;

        // The reseed and the evaluator call form one atom under the
        // interpreter token, so concurrent evaluations cannot interleave
        // their random sequences.
        let guard = engine.exclusive();
        self.random_seed(time, hash_function(dimension as u32));
        let result = engine
            .evaluator()
            .execute(self, &expression, time, view, dimension)
            .map_err(|message| KnobError::ExpressionFailed { dimension, message });
        drop(guard);
        result
    }

    /// Memoized expression results of (dimension, view), ordered by time
    pub fn get_expression_results(
        &self,
        dimension: usize,
        view: ViewIdx,
    ) -> Result<Vec<(f64, T)>, KnobError> {
        self.check_dimension(dimension)?;
        let state = self.state.lock();
        let mut out: Vec<(f64, T)> = state.expr_results[dimension]
            .get(&view)
            .map(|m| {
                m.iter()
                    .map(|(bits, v)| (f64::from_bits(*bits), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(out)
    }

    /// Drop memoized expression results without touching the expression
    /// text. Called when upstream dependencies of the expression changed.
    pub fn clear_expressions_results(
        &self,
        dimension: DimSpec,
        view: ViewSetSpec,
    ) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        let views = self.target_views(view);
        let mut state = self.state.lock();
        for &d in &dims {
            for v in &views {
                state.expr_results[d].remove(v);
            }
        }
        Ok(())
    }

    /// Reseed the expression random facility from a frame time and a mixed
    /// dimension hash
    pub fn random_seed(&self, time: f64, dimension_hash: u32) {
        *self.rng.lock() = StdRng::seed_from_u64(seed_for(time, dimension_hash));
    }

    fn next_random(&self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        self.rng.lock().random_range(min..max)
    }

    fn next_random_int(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return min;
        }
        self.rng.lock().random_range(min..max)
    }
}

impl<T: KnobValue> ExpressionRandom for Knob<T> {
    fn random(&self, min: f64, max: f64) -> f64 {
        self.next_random(min, max)
    }

    fn random_int(&self, min: i64, max: i64) -> i64 {
        self.next_random_int(min, max)
    }
}
