//! Per-dimension bounds
//!
//! Hard minimum/maximum clamp every value written through the store;
//! display bounds only hint UI sliders and never clamp. Bounds live behind
//! their own reader/writer lock so resolving reads do not contend with them.

use crate::error::KnobError;
use crate::types::DimSpec;
use crate::value::KnobValue;

use super::Knob;

pub(crate) struct RangeState<T> {
    minimums: Vec<T>,
    maximums: Vec<T>,
    display_mins: Vec<T>,
    display_maxs: Vec<T>,
}

impl<T: KnobValue> RangeState<T> {
    pub(crate) fn new(dimensions: usize) -> Self {
        Self {
            minimums: vec![T::range_min(); dimensions],
            maximums: vec![T::range_max(); dimensions],
            display_mins: vec![T::range_min(); dimensions],
            display_maxs: vec![T::range_max(); dimensions],
        }
    }
}

impl<T: KnobValue> Knob<T> {
    /// Set the hard bounds of the targeted dimensions
    pub fn set_range(&self, min: T, max: T, dimension: DimSpec) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        {
            let mut range = self.range.write();
            for &d in &dims {
                range.minimums[d] = min.clone();
                range.maximums[d] = max.clone();
            }
        }
        self.notify_range_changed(dimension);
        Ok(())
    }

    /// Set the UI slider bounds of the targeted dimensions
    pub fn set_display_range(&self, min: T, max: T, dimension: DimSpec) -> Result<(), KnobError> {
        let dims = self.target_dimensions(dimension)?;
        {
            let mut range = self.range.write();
            for &d in &dims {
                range.display_mins[d] = min.clone();
                range.display_maxs[d] = max.clone();
            }
        }
        self.notify_range_changed(dimension);
        Ok(())
    }

    /// Set all hard bounds at once, one pair per dimension
    pub fn set_range_across_dimensions(
        &self,
        minimums: &[T],
        maximums: &[T],
    ) -> Result<(), KnobError> {
        if minimums.len() != self.dimensions() || maximums.len() != self.dimensions() {
            return Err(KnobError::bad_dimension(
                minimums.len().max(maximums.len()).saturating_sub(1),
                self.dimensions(),
            ));
        }
        {
            let mut range = self.range.write();
            range.minimums = minimums.to_vec();
            range.maximums = maximums.to_vec();
        }
        self.notify_range_changed(DimSpec::All);
        Ok(())
    }

    /// Set all display bounds at once, one pair per dimension
    pub fn set_display_range_across_dimensions(
        &self,
        minimums: &[T],
        maximums: &[T],
    ) -> Result<(), KnobError> {
        if minimums.len() != self.dimensions() || maximums.len() != self.dimensions() {
            return Err(KnobError::bad_dimension(
                minimums.len().max(maximums.len()).saturating_sub(1),
                self.dimensions(),
            ));
        }
        {
            let mut range = self.range.write();
            range.display_mins = minimums.to_vec();
            range.display_maxs = maximums.to_vec();
        }
        self.notify_range_changed(DimSpec::All);
        Ok(())
    }

    pub fn get_minimum(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.range.read().minimums[dimension].clone())
    }

    pub fn get_maximum(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.range.read().maximums[dimension].clone())
    }

    pub fn get_display_minimum(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.range.read().display_mins[dimension].clone())
    }

    pub fn get_display_maximum(&self, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        Ok(self.range.read().display_maxs[dimension].clone())
    }

    /// Snapshot of the hard minimums across all dimensions
    pub fn get_minimums(&self) -> Vec<T> {
        self.range.read().minimums.clone()
    }

    /// Snapshot of the hard maximums across all dimensions
    pub fn get_maximums(&self) -> Vec<T> {
        self.range.read().maximums.clone()
    }

    /// Clamp a candidate value into the hard bounds of `dimension`.
    /// Non-numeric kinds pass through unchanged.
    pub fn clamp_to_min_max(&self, value: T, dimension: usize) -> Result<T, KnobError> {
        self.check_dimension(dimension)?;
        let range = self.range.read();
        Ok(value.clamped(&range.minimums[dimension], &range.maximums[dimension]))
    }

    fn notify_range_changed(&self, dimension: DimSpec) {
        if let Some(holder) = self.holder() {
            holder.range_changed(self.name(), dimension);
        }
    }
}
