pub trait AsXY<TX, TY> {
    fn x(&self) -> TX;
    fn y(&self) -> TY;
}

impl<T, TX, TY> AsXY<TX, TY> for &T
where
    T: AsXY<TX, TY>,
{
    fn x(&self) -> TX {
        (*self).x()
    }
    fn y(&self) -> TY {
        (*self).y()
    }
}

impl<TX, TY> AsXY<TX, TY> for (TX, TY)
where
    TX: Copy,
    TY: Copy,
{
    fn x(&self) -> TX {
        self.0
    }

    fn y(&self) -> TY {
        self.1
    }
}

/// `n` evenly spaced values over `[start, end]`, both ends included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|index| {
                    if index + 1 == n {
                        end
                    } else {
                        start + step * index as f64
                    }
                })
                .collect()
        }
    }
}

/// Linear interpolation between two points at `inter_x`.
pub fn interpolate(inter_x: f64, left: impl AsXY<f64, f64>, right: impl AsXY<f64, f64>) -> f64 {
    let ldiff = inter_x - left.x();
    let rdiff = right.x() - inter_x;
    let diff = right.x() - left.x();

    (rdiff * left.y() + ldiff * right.y()) / diff
}

/// Piecewise linear interpolation over points sorted by non-decreasing x.
///
/// Queries before the first point return `left`, queries after the last point
/// return `right`, and a query equal to the last x returns the last y.
pub fn interp<T>(inter_x: f64, points: &[T], left: f64, right: f64) -> f64
where
    T: AsXY<f64, f64>,
{
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return left,
    };

    if inter_x < first.x() {
        return left;
    }
    if inter_x > last.x() {
        return right;
    }
    if inter_x == last.x() {
        return last.y();
    }

    // first index whose x exceeds the query; bounded to 1..len by the checks above
    let index = points.partition_point(|point| point.x() <= inter_x);
    interpolate(inter_x, &points[index - 1], &points[index])
}
