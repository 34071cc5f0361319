use super::{CyCxHW, Rect};
use crate::{common::*, Transform};

/// Bounding box in TLBR format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Build a box from `[x1, y1, x2, y2]`, failing if the corners are swapped.
    pub fn try_from_xyxy(xyxy: [T; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = xyxy;
        Self::try_from_tlbr([y1, x1, y2, x2])
    }

    /// Build the box spanned by the two corners `(x1, y1)` and `(x2, y2)` in any order.
    pub fn from_xyxy(xyxy: [T; 4]) -> Self {
        let [x1, y1, x2, y2] = xyxy;
        let (l, r) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (t, b) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self { t, l, b, r }
    }

    pub fn transform(&self, transform: &Transform<T>) -> Self {
        Self::from_xyxy([
            self.l * transform.sx + transform.tx,
            self.t * transform.sy + transform.ty,
            self.r * transform.sx + transform.tx,
            self.b * transform.sy + transform.ty,
        ])
    }

    /// Clamp the box into the pixel grid of an image of `height` x `width`.
    pub fn clip(&self, height: T, width: T) -> Self {
        let zero = T::zero();
        let max_y = height - T::one();
        let max_x = width - T::one();
        let clamp = |value: T, max: T| {
            if value < zero {
                zero
            } else if value > max {
                max
            } else {
                value
            }
        };

        Self {
            t: clamp(self.t, max_y),
            l: clamp(self.l, max_x),
            b: clamp(self.b, max_y),
            r: clamp(self.r, max_x),
        }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> Self::Type {
        self.t
    }

    fn l(&self) -> Self::Type {
        self.l
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn cy(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.t + self.h() / two
    }

    fn cx(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.l + self.w() / two
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self> {
        let [cy, cx, h, w] = cycxhw;
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "h and w must be non-negative");

        let two = T::one() + T::one();
        let t = cy - h / two;
        let b = cy + h / two;
        let l = cx - w / two;
        let r = cx + w / two;

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        let b = t + h;
        let r = l + w;
        Self::try_from_tlbr([t, l, b, r])
    }
}

impl<T> From<CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: CyCxHW<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: &CyCxHW<T>) -> Self {
        let two = T::one() + T::one();
        let CyCxHW { cy, cx, h, w, .. } = *from;
        let t = cy - h / two;
        let l = cx - w / two;
        let b = cy + h / two;
        let r = cx + w / two;
        Self { t, l, b, r }
    }
}
