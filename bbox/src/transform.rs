use super::{Rect, TLBR};
use crate::{common::*, HW};

/// Per-axis affine map `y' = y * sy + ty`, `x' = x * sx + tx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn from_rects<R>(src: &R, tgt: &R) -> Self
    where
        R: Rect<Type = T>,
    {
        let sy = tgt.h() / src.h();
        let sx = tgt.w() / src.w();
        let ty = tgt.t() - src.t() * sy;
        let tx = tgt.l() - src.l() * sx;

        Self { sy, sx, ty, tx }
    }

    /// The resize-and-pad transform recorded by a letterboxing data loader.
    ///
    /// `ratio` is `(ry, rx)` and `pad` is `(px, py)`, the offsets added on the
    /// x and y axes after resizing.
    pub fn from_ratio_pad(ratio: (T, T), pad: (T, T)) -> Self {
        let (sy, sx) = ratio;
        let (tx, ty) = pad;
        Self { sy, sx, ty, tx }
    }

    /// The transform that fits `src_size` into `tgt_size` keeping the aspect
    /// ratio and centering the result.
    pub fn from_sizes_letterbox(src_size: &HW<T>, tgt_size: &HW<T>) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            src_size.h() > zero && src_size.w() > zero,
            "source size must be positive"
        );

        let (new_h, new_w) = if tgt_size.h() * src_size.w() <= tgt_size.w() * src_size.h() {
            let new_h = tgt_size.h();
            let new_w = src_size.w() * tgt_size.h() / src_size.h();
            (new_h, new_w)
        } else {
            let new_h = src_size.h() * tgt_size.w() / src_size.w();
            let new_w = tgt_size.w();
            (new_h, new_w)
        };

        let two = T::one() + T::one();
        let off_y = (tgt_size.h() - new_h) / two;
        let off_x = (tgt_size.w() - new_w) / two;

        let src = TLBR::try_from_tlhw([zero, zero, src_size.h(), src_size.w()])?;
        let tgt = TLBR::try_from_tlhw([off_y, off_x, new_h, new_w])?;

        Ok(Self::from_rects(&src, &tgt))
    }
}

impl<T> Transform<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    pub fn inverse(&self) -> Self {
        let sy = T::one() / self.sy;
        let sx = T::one() / self.sx;
        let ty = -self.ty / self.sy;
        let tx = -self.tx / self.sx;

        Self { sy, sx, ty, tx }
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    type Output = TLBR<T>;

    fn mul(self, rhs: &TLBR<T>) -> Self::Output {
        rhs.transform(self)
    }
}
