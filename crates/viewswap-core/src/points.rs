//! Fixed-point credit amounts
//!
//! Balances move in steps of a tenth of a point (one verified view), so they
//! are stored as integer tenths. Arithmetic is exact; only display divides.

use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Credit amount in tenths of a point
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);
    /// Smallest representable step (0.1)
    pub const TENTH: Points = Points(1);
    /// One whole point (1.0)
    pub const ONE: Points = Points(10);

    /// Create from a raw number of tenths
    pub const fn from_tenths(tenths: i64) -> Self {
        Self(tenths)
    }

    /// Create from whole points
    pub const fn from_whole(points: i64) -> Self {
        Self(points * 10)
    }

    /// Raw number of tenths
    pub const fn tenths(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Whole points, or `None` when the tenths do not fit
    pub const fn checked_from_whole(points: i64) -> Option<Self> {
        match points.checked_mul(10) {
            Some(tenths) => Some(Self(tenths)),
            None => None,
        }
    }

    pub fn checked_add(self, other: Points) -> Option<Points> {
        self.0.checked_add(other.0).map(Points)
    }

    pub fn checked_sub(self, other: Points) -> Option<Points> {
        self.0.checked_sub(other.0).map(Points)
    }

    /// Approximate value as a float (display and JSON only)
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 10.0
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points(self.0 + rhs.0)
    }
}

impl AddAssign for Points {
    fn add_assign(&mut self, rhs: Points) {
        self.0 += rhs.0;
    }
}

impl Sub for Points {
    type Output = Points;

    fn sub(self, rhs: Points) -> Points {
        Points(self.0 - rhs.0)
    }
}

impl Neg for Points {
    type Output = Points;

    fn neg(self) -> Points {
        Points(-self.0)
    }
}
