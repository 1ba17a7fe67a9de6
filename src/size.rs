// size.rs — 3-D size calculus.
//
// Every argument and every stage of a pipeline has a concrete 3-D extent, but
// only the host inputs know theirs up front (they come from the loaded data).
// Everything else is derived from an earlier extent through a `RangeSpec`:
//
//   ref size ──(mode, params)──► derived size
//
// Modes:
//   Exact     params verbatim, reference ignored
//   AddSub    r + p            (grow/shrink borders)
//   Multiply  r * p
//   Divide    r / p            (truncating)
//   Row       x, z exact;  y = r.y + p.y
//   Column    y, z exact;  x = r.x + p.x
//   Diagonal  x exact;  y = floor(|(r.x, r.y)|) + p.y rounded down to even;
//             z = r.z + p.z   (Hough-style angle × distance accumulators)
//
// A derived axis that ends up ≤ 0 is a configuration error and is reported,
// never clamped. Arithmetic runs in i128 so no intermediate can wrap.

use std::fmt;

/// A positive 3-D extent: image width/height/depth, buffer element grid, or
/// kernel execution range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size3D {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Size3D {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Size3D { x, y, z }
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }

    /// Number of elements covered by the extent, `None` if it overflows.
    pub fn volume(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }
}

impl fmt::Display for Size3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}×{}", self.x, self.y, self.z)
    }
}

impl From<[usize; 3]> for Size3D {
    fn from(d: [usize; 3]) -> Self {
        Size3D::new(d[0], d[1], d[2])
    }
}

/// How a derived size is computed from its reference size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Exact,
    AddSub,
    Multiply,
    Divide,
    Row,
    Column,
    Diagonal,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::Exact,
        Mode::AddSub,
        Mode::Multiply,
        Mode::Divide,
        Mode::Row,
        Mode::Column,
        Mode::Diagonal,
    ];

    /// Manifest spelling of the mode.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Exact => "EXACT",
            Mode::AddSub => "ADD_SUB",
            Mode::Multiply => "MULTIPLY",
            Mode::Divide => "DIVIDE",
            Mode::Row => "ROW",
            Mode::Column => "COLUMN",
            Mode::Diagonal => "DIAGONAL",
        }
    }

    /// Look a mode up by its manifest spelling (ASCII case-insensitive).
    pub fn from_name(name: &str) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Whether the mode reads its reference size at all.
    pub fn uses_reference(&self) -> bool {
        !matches!(self, Mode::Exact)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size-propagation rule: a mode, its three parameters, and the absolute index
/// of the argument whose size is the reference.
///
/// `ref_index` must point strictly backwards in declaration order. It is
/// ignored by [`Mode::Exact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub mode: Mode,
    pub params: [i32; 3],
    pub ref_index: u16,
}

impl RangeSpec {
    pub const fn new(mode: Mode, params: [i32; 3], ref_index: u16) -> Self {
        RangeSpec { mode, params, ref_index }
    }

    /// A fixed size independent of any other argument.
    pub const fn exact(params: [i32; 3]) -> Self {
        RangeSpec { mode: Mode::Exact, params, ref_index: 0 }
    }

    /// Same size as the referenced argument (`AddSub` with zero params).
    pub const fn same_as(ref_index: u16) -> Self {
        RangeSpec { mode: Mode::AddSub, params: [0, 0, 0], ref_index }
    }
}

/// A size calculation produced an unusable extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSize {
    #[error("axis {axis} resolved to {value}, sizes must be positive")]
    NonPositive { axis: char, value: i128 },
    #[error("axis {axis} divides by zero")]
    ZeroDivisor { axis: char },
    #[error("axis {axis} resolved to {value}, which does not fit in usize")]
    Overflow { axis: char, value: i128 },
    #[error("extent {size} holds more elements than can be addressed")]
    TooLarge { size: Size3D },
}

const AXES: [char; 3] = ['x', 'y', 'z'];

/// Apply `spec` to `reference`.
///
/// Pure; the caller is responsible for feeding the already-resolved size of
/// `spec.ref_index` (or anything at all for `Exact`).
pub fn resolve(reference: Size3D, spec: &RangeSpec) -> Result<Size3D, InvalidSize> {
    let p = spec.params.map(i128::from);
    let r = reference.as_array().map(|v| v as i128);

    let out: [i128; 3] = match spec.mode {
        Mode::Exact => p,
        Mode::AddSub => [r[0] + p[0], r[1] + p[1], r[2] + p[2]],
        Mode::Multiply => [r[0] * p[0], r[1] * p[1], r[2] * p[2]],
        Mode::Divide => {
            if let Some(axis) = p.iter().position(|&d| d == 0) {
                return Err(InvalidSize::ZeroDivisor { axis: AXES[axis] });
            }
            // Truncates toward zero.
            [r[0] / p[0], r[1] / p[1], r[2] / p[2]]
        }
        Mode::Row => [p[0], r[1] + p[1], p[2]],
        Mode::Column => [r[0] + p[0], p[1], p[2]],
        Mode::Diagonal => {
            let diag = ((r[0] * r[0] + r[1] * r[1]) as f64).sqrt().floor() as i128;
            // `& !1` rounds down to even for positive values.
            [p[0], (diag + p[1]) & !1, r[2] + p[2]]
        }
    };

    let mut dims = [0usize; 3];
    for (axis, (&value, dim)) in out.iter().zip(dims.iter_mut()).enumerate() {
        if value <= 0 {
            return Err(InvalidSize::NonPositive { axis: AXES[axis], value });
        }
        *dim = usize::try_from(value)
            .map_err(|_| InvalidSize::Overflow { axis: AXES[axis], value })?;
    }
    let size = Size3D::from(dims);
    if size.volume().is_none() {
        return Err(InvalidSize::TooLarge { size });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_sub(params: [i32; 3]) -> RangeSpec {
        RangeSpec::new(Mode::AddSub, params, 0)
    }

    #[test]
    fn test_exact_ignores_reference() {
        let spec = RangeSpec::exact([16384, 1, 1]);
        for r in [Size3D::new(1, 1, 1), Size3D::new(640, 480, 3)] {
            assert_eq!(resolve(r, &spec).unwrap(), Size3D::new(16384, 1, 1));
        }
    }

    #[test]
    fn test_add_sub_round_trip() {
        let r = Size3D::new(512, 384, 1);
        let grown = resolve(r, &add_sub([1, 1, 0])).unwrap();
        assert_eq!(grown, Size3D::new(513, 385, 1));
        let back = resolve(grown, &add_sub([-1, -1, 0])).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_add_sub_rejects_non_positive() {
        let err = resolve(Size3D::new(1, 1, 1), &add_sub([-2, 0, 0])).unwrap_err();
        assert_eq!(err, InvalidSize::NonPositive { axis: 'x', value: -1 });
    }

    #[test]
    fn test_multiply_and_divide() {
        let r = Size3D::new(640, 480, 1);
        let m = resolve(r, &RangeSpec::new(Mode::Multiply, [3, 3, 1], 0)).unwrap();
        assert_eq!(m, Size3D::new(1920, 1440, 1));
        let d = resolve(r, &RangeSpec::new(Mode::Divide, [2, 3, 1], 0)).unwrap();
        assert_eq!(d, Size3D::new(320, 160, 1));
        // Truncating division.
        let t = resolve(Size3D::new(7, 7, 1), &RangeSpec::new(Mode::Divide, [2, 2, 1], 0)).unwrap();
        assert_eq!(t, Size3D::new(3, 3, 1));
    }

    #[test]
    fn test_divide_by_zero() {
        let err = resolve(Size3D::new(8, 8, 1), &RangeSpec::new(Mode::Divide, [2, 0, 1], 0))
            .unwrap_err();
        assert_eq!(err, InvalidSize::ZeroDivisor { axis: 'y' });
    }

    #[test]
    fn test_divide_to_zero_is_invalid() {
        let err = resolve(Size3D::new(3, 8, 1), &RangeSpec::new(Mode::Divide, [4, 1, 1], 0))
            .unwrap_err();
        assert!(matches!(err, InvalidSize::NonPositive { axis: 'x', value: 0 }));
    }

    #[test]
    fn test_row_and_column() {
        let r = Size3D::new(640, 480, 2);
        let row = resolve(r, &RangeSpec::new(Mode::Row, [1, -10, 1], 0)).unwrap();
        assert_eq!(row, Size3D::new(1, 470, 1));
        let col = resolve(r, &RangeSpec::new(Mode::Column, [5, 1, 1], 0)).unwrap();
        assert_eq!(col, Size3D::new(645, 1, 1));
    }

    #[test]
    fn test_diagonal_hough_accumulator() {
        // 640×480 → diagonal exactly 800.
        let spec = RangeSpec::new(Mode::Diagonal, [2048, -4, 0], 0);
        let out = resolve(Size3D::new(640, 480, 1), &spec).unwrap();
        assert_eq!(out, Size3D::new(2048, 796, 1));
    }

    #[test]
    fn test_diagonal_rounds_down_to_even() {
        // 10×10 → sqrt(200) = 14.14 → 14, +1 = 15 → 14.
        let spec = RangeSpec::new(Mode::Diagonal, [180, 1, 0], 0);
        let out = resolve(Size3D::new(10, 10, 1), &spec).unwrap();
        assert_eq!(out.y, 14);
    }

    #[test]
    fn test_exact_zero_is_invalid() {
        let err = resolve(Size3D::new(4, 4, 4), &RangeSpec::exact([4, 4, 0])).unwrap_err();
        assert_eq!(err, InvalidSize::NonPositive { axis: 'z', value: 0 });
    }

    #[test]
    fn test_mode_names() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_name(mode.name()), Some(mode));
        }
        assert_eq!(Mode::from_name("add_sub"), Some(Mode::AddSub));
        assert_eq!(Mode::from_name("REL"), None);
        assert!(!Mode::Exact.uses_reference());
        assert!(Mode::Diagonal.uses_reference());
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size3D::new(513, 385, 1).to_string(), "513×385×1");
        assert_eq!(Size3D::new(2, 3, 4).volume(), Some(24));
        assert_eq!(Size3D::new(usize::MAX, 2, 1).volume(), None);
    }

    #[test]
    fn test_exact_rejects_unaddressable_extent() {
        let spec = RangeSpec::exact([i32::MAX; 3]);
        let err = resolve(Size3D::new(1, 1, 1), &spec).unwrap_err();
        assert!(matches!(err, InvalidSize::TooLarge { .. }));
        // Each axis is fine on its own.
        assert!(resolve(Size3D::new(1, 1, 1), &RangeSpec::exact([i32::MAX, 1, 1])).is_ok());
    }
}
