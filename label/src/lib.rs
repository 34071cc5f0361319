//! Ground truth labels and scored detections.

use bbox::{Rect, Transform, TLBR};
use num_traits::Num;
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A ground truth box with its class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

/// A predicted box with its class and confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
    pub confidence: f64,
}

impl<'a, T, C> Mul<&'a Label<TLBR<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Label<TLBR<T>, C>;

    fn mul(self, rhs: &'a Label<TLBR<T>, C>) -> Self::Output {
        Label {
            rect: self * &rhs.rect,
            class: rhs.class,
        }
    }
}

impl<'a, T, C> Mul<&'a Detection<TLBR<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Detection<TLBR<T>, C>;

    fn mul(self, rhs: &'a Detection<TLBR<T>, C>) -> Self::Output {
        Detection {
            rect: self * &rhs.rect,
            class: rhs.class,
            confidence: rhs.confidence,
        }
    }
}
