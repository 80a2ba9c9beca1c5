//! Greatest common divisor variants used as interchangeable workloads.
//!
//! All of them agree whenever both magnitudes fit an `i64`: `gcd(0, 0) == 0`
//! and the result is never negative. `i64::MIN` operands yield
//! `WorkloadError::Overflow`, except in `big_integer` which only fails when the
//! result itself doesn't fit.

use crate::orchestra::WorkloadError;

fn magnitudes(a: i64, b: i64) -> Result<(i64, i64), WorkloadError> {
    match (a.checked_abs(), b.checked_abs()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(WorkloadError::Overflow { a, b }),
    }
}

/// Euclid's algorithm as a remainder loop.
pub fn iterative_euclid(a: i64, b: i64) -> Result<i64, WorkloadError> {
    let (mut x, mut y) = magnitudes(a, b)?;
    while y != 0 {
        (x, y) = (y, x % y);
    }
    Ok(x)
}

/// Euclid's algorithm by tail recursion.
pub fn recursive_euclid(a: i64, b: i64) -> Result<i64, WorkloadError> {
    fn go(x: i64, y: i64) -> i64 {
        if y == 0 { x } else { go(y, x % y) }
    }

    let (x, y) = magnitudes(a, b)?;
    Ok(go(x, y))
}

/// Euclid's algorithm over 128-bit integers, narrowed back on return.
pub fn big_integer(a: i64, b: i64) -> Result<i64, WorkloadError> {
    let (mut x, mut y) = (a.unsigned_abs() as u128, b.unsigned_abs() as u128);
    while y != 0 {
        (x, y) = (y, x % y);
    }
    i64::try_from(x).map_err(|_| WorkloadError::Overflow { a, b })
}

/// Stein's binary GCD.
pub fn binary(a: i64, b: i64) -> Result<i64, WorkloadError> {
    let (x, y) = magnitudes(a, b)?;
    let (mut x, mut y) = (x as u64, y as u64);

    if x == 0 {
        return Ok(y as i64);
    }
    if y == 0 {
        return Ok(x as i64);
    }

    let shift = (x | y).trailing_zeros();
    x >>= x.trailing_zeros();

    loop {
        y >>= y.trailing_zeros();
        if x > y {
            std::mem::swap(&mut x, &mut y);
        }
        y -= x;
        if y == 0 {
            break;
        }
    }

    Ok((x << shift) as i64)
}
