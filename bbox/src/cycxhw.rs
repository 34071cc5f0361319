use super::{Rect, TLBR};
use crate::common::*;

/// Bounding box stored as its center and size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CyCxHW<T> {
    pub(crate) cy: T,
    pub(crate) cx: T,
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> CyCxHW<T>
where
    T: Float,
{
    /// Apply anchor regression deltas `[dy, dx, dh, dw]`.
    ///
    /// The center moves by `dy` heights and `dx` widths, the size is scaled
    /// by `exp(dh)` and `exp(dw)`.
    pub fn apply_deltas(&self, deltas: [T; 4]) -> Self {
        let [dy, dx, dh, dw] = deltas;
        let Self { cy, cx, h, w } = *self;

        Self {
            cy: cy + dy * h,
            cx: cx + dx * w,
            h: h * dh.exp(),
            w: w * dw.exp(),
        }
    }
}

impl<T> Rect for CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        self.cy - self.h / (T::one() + T::one())
    }

    fn l(&self) -> T {
        self.cx - self.w / (T::one() + T::one())
    }

    fn b(&self) -> T {
        self.cy + self.h / (T::one() + T::one())
    }

    fn r(&self) -> T {
        self.cx + self.w / (T::one() + T::one())
    }

    fn cy(&self) -> T {
        self.cy
    }

    fn cx(&self) -> T {
        self.cx
    }

    fn h(&self) -> T {
        self.h
    }

    fn w(&self) -> T {
        self.w
    }

    fn try_from_tlbr(tlbr: [T; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        Self::try_from_tlhw([t, l, b - t, r - l])
    }

    fn try_from_tlhw(tlhw: [T; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        let two = T::one() + T::one();
        Self::try_from_cycxhw([t + h / two, l + w / two, h, w])
    }

    fn try_from_cycxhw(cycxhw: [T; 4]) -> Result<Self> {
        let [cy, cx, h, w] = cycxhw;
        ensure!(
            h >= T::zero() && w >= T::zero(),
            "box height and width must be non-negative"
        );
        Ok(Self { cy, cx, h, w })
    }
}

impl<T> From<&TLBR<T>> for CyCxHW<T>
where
    T: Copy + Num,
{
    fn from(from: &TLBR<T>) -> Self {
        let TLBR { t, l, b, r } = *from;
        let two = T::one() + T::one();
        let h = b - t;
        let w = r - l;
        Self {
            cy: t + h / two,
            cx: l + w / two,
            h,
            w,
        }
    }
}
