//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into the range `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    value.max(min).min(max)
}

/// Blend two values, giving a weight of `alpha` to `new` and `1 - alpha` to `old`.
pub fn blend<T>(new: T, old: T, alpha: T) -> T
where
    T: Float
{
    new * alpha + old * (T::one() - alpha)
}

/// Wrap an angle into the range `[-pi, pi]`.
pub fn wrap_pi<T>(angle: T) -> T
where
    T: Float
{
    angle.sin().atan2(angle.cos())
}
