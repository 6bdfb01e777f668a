use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Poids de luma perceptuelle BT.709.
pub const LUMA_R: f32 = 0.2126;
/// Green weight, BT.709.
pub const LUMA_G: f32 = 0.7152;
/// Blue weight, BT.709.
pub const LUMA_B: f32 = 0.0722;

/// Couleur RGB 8 bits. Sérialisée en `"#rrggbb"` dans la config.
///
/// # Example
/// ```
/// use af_core::color::Rgb;
/// let c: Rgb = "#ff8000".parse().unwrap();
/// assert_eq!(c, Rgb(255, 128, 0));
/// assert_eq!(c.to_string(), "#ff8000");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Self = Self(0, 0, 0);
    pub const WHITE: Self = Self(255, 255, 255);

    /// Channels as an array.
    #[must_use]
    pub fn to_array(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

impl FromStr for Rgb {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || CoreError::InvalidColor { value: s.to_string() };
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Luminance perceptuelle `0.2126R + 0.7152G + 0.0722B`, dans [0, 255].
///
/// # Example
/// ```
/// use af_core::color::luminance;
/// assert_eq!(luminance(0, 0, 0), 0.0);
/// assert!((luminance(255, 255, 255) - 255.0).abs() < 1e-3);
/// ```
#[inline(always)]
#[must_use]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    LUMA_R * f32::from(r) + LUMA_G * f32::from(g) + LUMA_B * f32::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_missing_hash() {
        assert_eq!("33ff66".parse::<Rgb>().ok(), Some(Rgb(0x33, 0xff, 0x66)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("#gg0000".parse::<Rgb>().is_err());
        assert!("#éé0000".parse::<Rgb>().is_err());
        assert_eq!(
            "red".parse::<Rgb>(),
            Err(CoreError::InvalidColor { value: "red".into() })
        );
    }

    #[test]
    fn green_dominates_luminance() {
        assert!(luminance(0, 255, 0) > luminance(255, 0, 0));
        assert!(luminance(255, 0, 0) > luminance(0, 0, 255));
    }
}
