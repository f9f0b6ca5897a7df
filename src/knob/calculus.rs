//! Derivatives and definite integrals over a knob's resolved value
//!
//! Both operations follow the same priority chain as the resolving read.
//! Expressions are opaque, so they are differentiated by central difference
//! and integrated by composite Simpson quadrature split at integer frame
//! boundaries. Links delegate to the master, curves answer analytically, and
//! a constant value has a zero derivative and a rectangular integral.

use crate::error::KnobError;
use crate::links::LinkKey;
use crate::types::{ValueKind, ViewIdx};
use crate::value::KnobValue;

use super::Knob;

impl<T: KnobValue> Knob<T> {
    /// Derivative of the resolved value with respect to time
    pub fn get_derivative_at_time(
        &self,
        time: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<f64, KnobError> {
        if T::KIND == ValueKind::String {
            return Err(KnobError::UnsupportedOperation(
                "derivative of a string knob",
            ));
        }
        self.check_dimension(dimension)?;

        let has_expression = self
            .get_expression(dimension, view)?
            .is_some_and(|e| !e.is_empty());
        if has_expression {
            // Expressions are black boxes; central difference over one frame
            let after = self.get_value_at_time(time + 0.5, dimension, view)?.to_f64();
            let before = self.get_value_at_time(time - 0.5, dimension, view)?.to_f64();
            return Ok((after - before) / 2.0);
        }

        let key = LinkKey { knob: self.id(), dimension, view };
        if let Some(link) = self.link_table().master_of(&key) {
            if let Some(master) = link.master.upgrade() {
                return master.get_derivative_at_time(time, link.view, link.dimension);
            }
        }

        if let Some(curve) = self.get_curve(dimension, view)? {
            if curve.keyframes_count() > 0 {
                return Ok(curve.derivative_at(time));
            }
        }

        Ok(0.0)
    }

    /// Definite integral of the resolved value over `[time1, time2]`
    pub fn get_integrate_from_time_to_time(
        &self,
        time1: f64,
        time2: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<f64, KnobError> {
        if T::KIND == ValueKind::String {
            return Err(KnobError::UnsupportedOperation("integral of a string knob"));
        }
        self.check_dimension(dimension)?;

        let has_expression = self
            .get_expression(dimension, view)?
            .is_some_and(|e| !e.is_empty());
        if has_expression {
            return self.integrate_expression(time1, time2, view, dimension);
        }

        let key = LinkKey { knob: self.id(), dimension, view };
        if let Some(link) = self.link_table().master_of(&key) {
            if let Some(master) = link.master.upgrade() {
                return master.get_integrate_from_time_to_time(
                    time1,
                    time2,
                    link.view,
                    link.dimension,
                );
            }
        }

        if let Some(curve) = self.get_curve(dimension, view)? {
            if curve.keyframes_count() > 0 {
                return Ok(curve.integrate(time1, time2));
            }
        }

        // Constant value: a rectangle, negative when the interval is reversed
        let value = self.get_raw_value(dimension, view)?.to_f64();
        Ok(value * (time2 - time1))
    }

    /// Simpson's rule over `[a, b]` with one midpoint sample
    fn simpson(&self, a: f64, b: f64, view: ViewIdx, dimension: usize) -> Result<f64, KnobError> {
        let fa = self.get_value_at_time(a, dimension, view)?.to_f64();
        let fm = self
            .get_value_at_time((a + b) / 2.0, dimension, view)?
            .to_f64();
        let fb = self.get_value_at_time(b, dimension, view)?.to_f64();
        Ok((b - a) / 6.0 * (fa + 4.0 * fm + fb))
    }

    /// Composite quadrature split at integer frame boundaries, so each
    /// sub-interval spans at most one frame of expression output.
    fn integrate_expression(
        &self,
        time1: f64,
        time2: f64,
        view: ViewIdx,
        dimension: usize,
    ) -> Result<f64, KnobError> {
        if time1 == time2 {
            return Ok(0.0);
        }
        if time1 > time2 {
            return Ok(-self.integrate_expression(time2, time1, view, dimension)?);
        }

        let first_whole = time1.ceil();
        let last_whole = time2.floor();
        if first_whole > last_whole {
            // The interval lives inside a single frame
            return self.simpson(time1, time2, view, dimension);
        }

        let mut sum = 0.0;
        if time1 < first_whole {
            sum += self.simpson(time1, first_whole, view, dimension)?;
        }
        let mut t = first_whole;
        while t + 1.0 <= last_whole {
            sum += self.simpson(t, t + 1.0, view, dimension)?;
            t += 1.0;
        }
        if last_whole < time2 {
            sum += self.simpson(last_whole, time2, view, dimension)?;
        }
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptEngine;
    use crate::test_support::{new_knob, RecordingHolder, ScriptedEvaluator, TestCurve};
    use crate::traits::KeyFrame;
    use crate::types::{DimSpec, ValueChangedReason, ViewSetSpec};
    use crate::value::ScriptValue;
    use std::sync::Arc;

    #[test]
    fn test_constant_value_calculus() {
        let (knob, _holder) = new_knob::<f64>("gain", 1);
        knob.set_value(3.0, ViewSetSpec::All, DimSpec::Index(0), ValueChangedReason::UserEdited)
            .unwrap();

        assert_eq!(knob.get_derivative_at_time(5.0, ViewIdx::MAIN, 0).unwrap(), 0.0);
        assert_eq!(
            knob.get_integrate_from_time_to_time(0.0, 10.0, ViewIdx::MAIN, 0).unwrap(),
            30.0
        );
        // Reversed interval flips the sign
        assert_eq!(
            knob.get_integrate_from_time_to_time(10.0, 0.0, ViewIdx::MAIN, 0).unwrap(),
            -30.0
        );
    }

    #[test]
    fn test_curve_calculus_is_analytic() {
        let (knob, _holder) = new_knob::<f64>("gain", 1);
        let curve = Arc::new(TestCurve::new(vec![
            KeyFrame::new(0.0, 0.0),
            KeyFrame::new(10.0, 20.0),
        ]));
        knob.set_curve(0, ViewIdx::MAIN, curve).unwrap();

        assert_eq!(knob.get_derivative_at_time(5.0, ViewIdx::MAIN, 0).unwrap(), 2.0);
        // Integral of the ramp 2t over [0, 10] is 100
        assert_eq!(
            knob.get_integrate_from_time_to_time(0.0, 10.0, ViewIdx::MAIN, 0).unwrap(),
            100.0
        );
    }

    #[test]
    fn test_expression_central_difference_and_simpson() {
        // value(t) = t^2: integral t^3/3. Simpson is exact for quadratics.
        let engine = ScriptEngine::new(Arc::new(ScriptedEvaluator::new(|_r, _e, t, _v, _d| {
            Ok(ScriptValue::Float(t * t))
        })));
        let (knob, _holder) = new_knob::<f64>("gain", 1);
        knob.set_script_engine(engine);
        knob.set_expression(0, ViewIdx::MAIN, "frame ** 2").unwrap();

        // Finite difference over [t - 0.5, t + 0.5] divided by 2:
        // (3.5^2 - 2.5^2) / 2 = 3
        let d = knob.get_derivative_at_time(3.0, ViewIdx::MAIN, 0).unwrap();
        assert!((d - 3.0).abs() < 1e-9);

        let i = knob.get_integrate_from_time_to_time(0.0, 3.0, ViewIdx::MAIN, 0).unwrap();
        assert!((i - 9.0).abs() < 1e-9);

        // Fractional bounds exercise the partial sub-intervals
        let i = knob.get_integrate_from_time_to_time(0.5, 2.5, ViewIdx::MAIN, 0).unwrap();
        let exact = (2.5f64.powi(3) - 0.5f64.powi(3)) / 3.0;
        assert!((i - exact).abs() < 1e-9);

        // Interval inside a single frame
        let i = knob.get_integrate_from_time_to_time(1.25, 1.75, ViewIdx::MAIN, 0).unwrap();
        let exact = (1.75f64.powi(3) - 1.25f64.powi(3)) / 3.0;
        assert!((i - exact).abs() < 1e-9);

        assert_eq!(
            knob.get_integrate_from_time_to_time(2.0, 2.0, ViewIdx::MAIN, 0).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_link_delegates_calculus() {
        let (slave, _h1) = new_knob::<f64>("slave", 1);
        let (master, _h2) =
            RecordingHolder::knob_with_table::<f64>("master", 1, slave.link_table().clone());
        let curve = Arc::new(TestCurve::new(vec![
            KeyFrame::new(0.0, 0.0),
            KeyFrame::new(4.0, 8.0),
        ]));
        master.set_curve(0, ViewIdx::MAIN, curve).unwrap();
        slave.slave_to(0, ViewIdx::MAIN, &master, 0, ViewIdx::MAIN).unwrap();

        assert_eq!(slave.get_derivative_at_time(1.0, ViewIdx::MAIN, 0).unwrap(), 2.0);
        assert_eq!(
            slave.get_integrate_from_time_to_time(0.0, 4.0, ViewIdx::MAIN, 0).unwrap(),
            16.0
        );
    }

    #[test]
    fn test_string_knob_rejects_calculus() {
        let (knob, _holder) = new_knob::<String>("label", 1);
        assert!(matches!(
            knob.get_derivative_at_time(0.0, ViewIdx::MAIN, 0),
            Err(KnobError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            knob.get_integrate_from_time_to_time(0.0, 1.0, ViewIdx::MAIN, 0),
            Err(KnobError::UnsupportedOperation(_))
        ));
    }
}
