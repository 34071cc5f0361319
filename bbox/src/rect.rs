use super::{CyCxHW, TLBR};
use crate::common::*;

/// The generic rectangle.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn cycxhw(&self) -> [Self::Type; 4] {
        [self.cy(), self.cx(), self.h(), self.w()]
    }

    fn tlbr(&self) -> [Self::Type; 4] {
        [self.t(), self.l(), self.b(), self.r()]
    }

    /// Corners in `[x1, y1, x2, y2]` order.
    fn xyxy(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }

    fn hw(&self) -> [Self::Type; 2] {
        [self.h(), self.w()]
    }

    fn to_cycxhw(&self) -> CyCxHW<Self::Type> {
        CyCxHW {
            cy: self.cy(),
            cx: self.cx(),
            h: self.h(),
            w: self.w(),
        }
    }

    fn to_tlbr(&self) -> TLBR<Self::Type> {
        TLBR {
            t: self.t(),
            l: self.l(),
            b: self.b(),
            r: self.r(),
        }
    }

    fn area(&self) -> <Self::Type as Mul<Self::Type>>::Output
    where
        Self::Type: Mul<Self::Type>,
    {
        self.h() * self.w()
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    /// Compute the intersection rectangle, or `None` if the rectangles do not overlap.
    fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().max(other.t());
        let l = self.l().max(other.l());
        let b = self.b().min(other.b());
        let r = self.r().min(other.r());
        (b > t && r > l).then(|| TLBR { t, l, b, r })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union. Degenerate pairs with zero union area yield zero.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.h() * other.w() - inter_area;

        if union_area <= zero {
            zero
        } else {
            inter_area / union_area
        }
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}

/// Pairwise IoU between two box sets. Entry `[i][j]` pairs `lhs[i]` with `rhs[j]`.
pub fn iou_matrix<T, L, R>(lhs: &[L], rhs: &[R]) -> Vec<Vec<T>>
where
    T: Float,
    L: Rect<Type = T>,
    R: Rect<Type = T>,
{
    lhs.iter()
        .map(|a| rhs.iter().map(|b| a.iou_with(b)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identical_boxes_have_unit_iou() {
        let a = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let b = a.clone();
        assert_eq!(a.iou_with(&b), 1.0);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let a = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let b = TLBR::from_xyxy([20.0, 20.0, 30.0, 30.0]);
        assert_eq!(a.iou_with(&b), 0.0);

        // touching edges do not intersect
        let c = TLBR::from_xyxy([10.0, 0.0, 20.0, 10.0]);
        assert_eq!(a.iou_with(&c), 0.0);
    }

    #[test]
    fn partial_overlap_iou() {
        let a = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let b = TLBR::from_xyxy([5.0, 5.0, 15.0, 15.0]);
        assert_abs_diff_eq!(a.iou_with(&b), 25.0 / 175.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_boxes_have_zero_iou() {
        let a = TLBR::from_xyxy([3.0, 3.0, 3.0, 3.0]);
        assert_eq!(a.iou_with(&a), 0.0);
    }

    #[test]
    fn disjoint_intersection_area_is_zero() {
        let a: TLBR<f32> = TLBR::from_xyxy([0.0, 0.0, 4.0, 4.0]);
        let b: TLBR<f32> = TLBR::from_xyxy([6.0, 6.0, 8.0, 8.0]);
        assert_eq!(a.intersection_area_with(&b), 0.0);
        assert_eq!(a.intersection_area_with(&a), 16.0);
    }

    #[test]
    fn iou_matrix_shape() {
        let preds = [
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
            TLBR::from_xyxy([0.0, 0.0, 5.0, 10.0]),
        ];
        let labels = [TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0])];
        let ious = iou_matrix(&preds, &labels);
        assert_eq!(ious.len(), 2);
        assert_eq!(ious[0].len(), 1);
        assert_eq!(ious[0][0], 1.0);
        assert_abs_diff_eq!(ious[1][0], 0.5, epsilon = 1e-12);
    }
}
