use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A Sheba number: the Iranian IBAN, `"IR"` followed by exactly 24 digits.
///
/// Used as the settlement destination in scattered-settlement items and on
/// agency customer profiles. Construction is the only validation point; a
/// [`Sheba`] value is always well-formed.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sheba(String);

#[derive(Debug, thiserror::Error)]
#[error("sheba number must be \"IR\" followed by 24 digits")]
pub struct InvalidSheba;

impl Sheba {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Sheba {
    type Err = InvalidSheba;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Byte-wise: non-ASCII inputs must fail, never panic.
        let bytes = s.as_bytes();
        if bytes.len() != 26
            || &bytes[..2] != b"IR"
            || !bytes[2..].iter().all(u8::is_ascii_digit)
        {
            return Err(InvalidSheba);
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for Sheba {
    type Error = InvalidSheba;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl From<Sheba> for String {
    fn from(sheba: Sheba) -> Self {
        sheba.0
    }
}

impl Display for Sheba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_well_formed() {
        let s = "IR062960000000100324200001";
        assert_eq!(s.len(), 26);
        let sheba = Sheba::from_str(s).unwrap();
        assert_eq!(sheba.as_str(), s);
    }

    #[test]
    fn rejects_malformed() {
        // Wrong length
        assert!(Sheba::from_str("IR0629600000001003242").is_err());
        // Wrong country prefix
        assert!(Sheba::from_str("DE062960000000100324200001").is_err());
        // Non-digit tail
        assert!(Sheba::from_str("IR06296000000010032420000X").is_err());
        // Multibyte chars must not pass the length check
        assert!(Sheba::from_str("IR۰۶۲۹۶۰۰۰۰۰۰۰۱۰۰۳۲۴۲۰۰۰").is_err());
    }

    #[test]
    fn serde_validates() {
        let ok = "\"IR062960000000100324200001\"";
        assert!(serde_json::from_str::<Sheba>(ok).is_ok());
        let bad = "\"IR06\"";
        assert!(serde_json::from_str::<Sheba>(bad).is_err());
    }
}
