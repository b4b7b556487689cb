//! A Toman amount newtype which maintains some useful internal invariants.
//!
//! All monetary amounts in the platform are non-negative integers in Toman,
//! the internal fiat unit. The payment gateway wire format is Rial
//! (1 Toman = 10 Rial), so [`Amount::rials`] is needed exactly once per
//! gateway call and [`Amount::try_from_rials`] exactly once per gateway
//! response.
//!
//! Note that we don't impl `From<u64>` because we want calling code to be
//! explicit about what the input unit is.

use std::{
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Sub},
};

use serde::{de, Deserialize, Deserializer, Serialize};

/// Errors that can occur when attempting to construct an [`Amount`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("amount is too large")]
    TooLarge,
    #[error("rial amount is not a multiple of 10")]
    NotRialMultiple,
}

/// A non-negative Toman amount.
///
/// - The contained value is no greater than [`Amount::MAX`].
/// - [`Amount::MAX`] is chosen so that the Rial conversion (x10) can never
///   overflow, making [`Amount::rials`] infallible and hence ergonomic.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(Serialize)]
pub struct Amount(u64);

impl Amount {
    /// An [`Amount`] of zero Tomans.
    pub const ZERO: Self = Self(0);

    /// The maximum [`Amount`] this type can represent.
    pub const MAX: Self = Self(u64::MAX / 10);

    // --- Constructors --- //

    /// Construct an [`Amount`] from a Toman value.
    ///
    /// Panics if the value exceeds [`Amount::MAX`]; intended for constants
    /// and test fixtures. Use [`Amount::try_from_tomans`] for user input.
    #[inline]
    pub const fn from_tomans(tomans: u64) -> Self {
        assert!(tomans <= Self::MAX.0);
        Self(tomans)
    }

    /// Construct an [`Amount`] from an untrusted Toman value.
    #[inline]
    pub fn try_from_tomans(tomans: u64) -> Result<Self, Error> {
        if tomans <= Self::MAX.0 {
            Ok(Self(tomans))
        } else {
            Err(Error::TooLarge)
        }
    }

    /// Construct an [`Amount`] from a Rial value, e.g. a gateway-reported
    /// settled amount. The value must be an exact multiple of 10.
    #[inline]
    pub fn try_from_rials(rials: u64) -> Result<Self, Error> {
        if rials % 10 != 0 {
            return Err(Error::NotRialMultiple);
        }
        // rials / 10 <= u64::MAX / 10 == MAX
        Ok(Self(rials / 10))
    }

    // --- Getters --- //

    /// Returns the [`Amount`] as a [`u64`] Toman value.
    #[inline]
    pub const fn tomans(self) -> u64 {
        self.0
    }

    /// Returns the [`Amount`] as a [`u64`] Rial value (x10).
    #[inline]
    pub const fn rials(self) -> u64 {
        // Infallible by the MAX invariant.
        self.0 * 10
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    // --- Checked arithmetic --- //

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let inner = self.0.checked_add(rhs.0)?;
        Self::try_from_tomans(inner).ok()
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Subtraction clamped at zero. Used by spend ordering, where the `free`
    /// compartment absorbs as much of a deduction as it can.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    // Amount * scalar => Amount
    pub fn checked_mul(self, rhs: u64) -> Option<Self> {
        let inner = self.0.checked_mul(rhs)?;
        Self::try_from_tomans(inner).ok()
    }

    // Amount / Amount => scalar
    pub fn checked_div(self, rhs: Self) -> Option<u64> {
        self.0.checked_div(rhs.0)
    }
}

// Panicking ops for code paths where the bound was already checked, e.g.
// summing compartments that were each validated on construction.

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).expect("Amount overflow")
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).expect("Amount underflow")
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Enforces the [`Amount::MAX`] bound.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u64::deserialize(deserializer)?;
        Self::try_from_tomans(value).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Unsigned(value),
                &"a Toman amount within bounds",
            )
        })
    }
}
