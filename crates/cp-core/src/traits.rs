//! Core traits for crimepanel
//!
//! Preparation steps (renaming, variable generation, reshaping) all
//! implement [`FrameTransform`], so the CLI can run a configured list of
//! steps without knowing their concrete types.

use crate::{Frame, Result};

/// A pure frame-to-frame transformation.
pub trait FrameTransform {
    /// Apply the transformation, returning a new frame.
    fn apply(&self, frame: &Frame) -> Result<Frame>;

    /// Short name used in logs (e.g. `"fixed_range_dummies"`).
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Column;

    struct Doubler;

    impl FrameTransform for Doubler {
        fn apply(&self, frame: &Frame) -> Result<Frame> {
            let mut out = frame.clone();
            let doubled: Vec<f64> = frame.floats("x")?.iter().map(|v| 2.0 * v).collect();
            out.insert_floats("x2", doubled)?;
            Ok(out)
        }

        fn name(&self) -> &str {
            "doubler"
        }
    }

    #[test]
    fn test_transform_object_safe() {
        let f = Frame::from_columns(vec![("x", Column::Float(vec![1.0, 2.0]))]).unwrap();
        let t: Box<dyn FrameTransform> = Box::new(Doubler);
        let g = t.apply(&f).unwrap();
        assert_eq!(t.name(), "doubler");
        assert_eq!(g.floats("x2").unwrap(), &[2.0, 4.0]);
    }
}
