use crate::common::*;

/// Validated image size with non-negative height and width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    h: T,
    w: T,
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw(hw: [T; 2]) -> Result<Self> {
        let [h, w] = hw;
        ensure!(
            h >= T::zero() && w >= T::zero(),
            "height and width must be non-negative"
        );
        Ok(Self { h, w })
    }

    pub fn area(&self) -> T {
        self.h * self.w
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn w(&self) -> T {
        self.w
    }
}

/// Unchecked image size as it appears in configuration and data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW_<T> {
    pub h: T,
    pub w: T,
}

impl<T> HW_<T>
where
    T: ToPrimitive + Copy,
{
    /// Convert to a validated floating point size.
    pub fn to_float_hw<F>(&self) -> Result<HW<F>>
    where
        F: Float,
    {
        let cast = |value: T| {
            <F as NumCast>::from(value)
                .ok_or_else(|| anyhow::format_err!("size is not representable"))
        };
        HW::try_from_hw([cast(self.h)?, cast(self.w)?])
    }
}

impl<T> TryFrom<HW_<T>> for HW<T>
where
    T: Copy + Num + PartialOrd,
{
    type Error = anyhow::Error;

    fn try_from(from: HW_<T>) -> Result<Self, Self::Error> {
        HW::try_from_hw([from.h, from.w])
    }
}
