use std::fmt;
use std::ops::{AddAssign, SubAssign};
use std::str::FromStr;

use malachite::base::num::arithmetic::traits::{DivRem, FloorSqrt};
use malachite::Natural;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoreError, CoreResult};

/// An exact non-negative arbitrary-precision token amount.
///
/// Every arithmetic operation either succeeds exactly or fails without
/// mutating the value. Division truncates toward zero.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity {
    inner: Natural,
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl Quantity {
    pub fn zero() -> Self {
        Self {
            inner: Natural::from(0u32),
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            inner: Natural::from(value),
        }
    }

    pub fn from_u128(value: u128) -> Self {
        Self {
            inner: Natural::from(value),
        }
    }

    pub fn from_natural(inner: Natural) -> Self {
        Self { inner }
    }

    pub fn as_natural(&self) -> &Natural {
        &self.inner
    }

    pub fn is_zero(&self) -> bool {
        self.inner == Natural::from(0u32)
    }

    pub fn add(&mut self, other: &Quantity) {
        self.inner.add_assign(other.inner.clone());
    }

    pub fn sub(&mut self, other: &Quantity) -> CoreResult<()> {
        if self.inner < other.inner {
            return Err(CoreError::InsufficientBalance);
        }
        self.inner.sub_assign(other.inner.clone());
        Ok(())
    }

    pub fn mul(&mut self, other: &Quantity) {
        self.inner = &self.inner * &other.inner;
    }

    pub fn quo(&mut self, other: &Quantity) -> CoreResult<()> {
        if other.is_zero() {
            return Err(CoreError::InvalidArgument);
        }
        let (quotient, _remainder) = self.inner.clone().div_rem(&other.inner);
        self.inner = quotient;
        Ok(())
    }

    /// Largest integer whose square does not exceed the value.
    pub fn floor_sqrt(&self) -> Quantity {
        Self {
            inner: self.inner.clone().floor_sqrt(),
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.inner).ok()
    }
}

/// Moves `amount` from `src` to `dst`. Either both balances change or
/// neither does.
pub fn move_amount(dst: &mut Quantity, src: &mut Quantity, amount: &Quantity) -> CoreResult<()> {
    src.sub(amount)?;
    dst.add(amount);
    Ok(())
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Quantity::from_u64(value)
    }
}

impl FromStr for Quantity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Natural::from_str(s).map(Quantity::from_natural)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.inner.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Natural::from_str(&value)
            .map(Quantity::from_natural)
            .map_err(|_| serde::de::Error::custom("invalid quantity value"))
    }
}
