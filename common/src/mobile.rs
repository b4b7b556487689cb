use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An Iranian mobile number in local format: `"09"` followed by 9 digits.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mobile(String);

#[derive(Debug, thiserror::Error)]
#[error("mobile number must be \"09\" followed by 9 digits")]
pub struct InvalidMobile;

impl Mobile {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Mobile {
    type Err = InvalidMobile;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 11
            || !s.starts_with("09")
            || !s.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(InvalidMobile);
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for Mobile {
    type Error = InvalidMobile;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl From<Mobile> for String {
    fn from(mobile: Mobile) -> Self {
        mobile.0
    }
}

impl Display for Mobile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation() {
        assert!(Mobile::from_str("09123456789").is_ok());
        assert!(Mobile::from_str("9123456789").is_err());
        assert!(Mobile::from_str("0912345678").is_err());
        assert!(Mobile::from_str("0912345678a").is_err());
        assert!(Mobile::from_str("08123456789").is_err());
    }
}
