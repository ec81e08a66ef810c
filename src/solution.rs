//! Plate solutions as reported by the solving engine.

use std::fmt;

/// Handedness of the sky-to-pixel mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parity {
    /// `det(CD) >= 0`.
    #[default]
    Positive,
    /// `det(CD) < 0`, the usual orientation of an unflipped sky image.
    Negative,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Positive => f.write_str("positive"),
            Parity::Negative => f.write_str("negative"),
        }
    }
}

/// Result of a successful solve.
///
/// The controller only forwards this value. When the completion event reports
/// `success == false` its content is unspecified.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Solution {
    /// Right ascension of the image centre, degrees (J2000).
    pub ra: f64,
    /// Declination of the image centre, degrees (J2000).
    pub dec: f64,
    /// Position angle of the image's up axis, degrees east of north.
    pub orientation: f64,
    /// Field width, arcminutes.
    pub field_width: f64,
    /// Field height, arcminutes.
    pub field_height: f64,
    /// Pixel scale, arcseconds per pixel.
    pub pixscale: f64,
    /// Parity of the solution.
    pub parity: Parity,
}

impl Solution {
    /// Right ascension as `HHhMMmSSs`.
    pub fn ra_string(&self) -> String {
        let total = (self.ra.rem_euclid(360.) / 15. * 3600.).round() as u64 % (24 * 3600);
        format!(
            "{:02}h{:02}m{:02}s",
            total / 3600,
            (total / 60) % 60,
            total % 60
        )
    }

    /// Declination as `±DD°MM'SS"`.
    pub fn dec_string(&self) -> String {
        let sign = if self.dec < 0. { '-' } else { '+' };
        let total = (self.dec.abs() * 3600.).round() as u64;
        format!(
            "{sign}{:02}°{:02}'{:02}\"",
            total / 3600,
            (total / 60) % 60,
            total % 60
        )
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RA (J2000) {}", self.ra_string())?;
        writeln!(f, "DEC (J2000) {}", self.dec_string())?;
        writeln!(f, "Orientation {:.4}°", self.orientation)?;
        writeln!(f, "Field Width {:.4}'", self.field_width)?;
        writeln!(f, "Field Height {:.4}'", self.field_height)?;
        writeln!(f, "PixScale {:.4}\"", self.pixscale)?;
        write!(f, "Parity {}", self.parity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sexagesimal() {
        let solution = Solution {
            ra: 65.,
            dec: -12.5,
            ..Default::default()
        };
        assert_eq!(solution.ra_string(), "04h20m00s");
        assert_eq!(solution.dec_string(), "-12°30'00\"");

        let solution = Solution {
            ra: 359.9999999,
            dec: 0.0001,
            ..Default::default()
        };
        assert_eq!(solution.ra_string(), "00h00m00s");
        assert_eq!(solution.dec_string(), "+00°00'00\"");
    }

    #[test]
    fn report() {
        let solution = Solution {
            ra: 83.8221,
            dec: -5.3911,
            orientation: 12.,
            field_width: 60.,
            field_height: 40.,
            pixscale: 1.5,
            parity: Parity::Negative,
        };
        let report = solution.to_string();
        assert!(report.starts_with("RA (J2000) 05h35m17s\n"));
        assert!(report.contains("DEC (J2000) -05°23'28\""));
        assert!(report.ends_with("Parity negative"));
    }
}
