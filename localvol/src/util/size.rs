//! Human size literals ("10G", "512", "4K").

use std::sync::LazyLock;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use regex::Regex;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

static SIZE_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<digits>[0-9]+)(?P<suffix>[A-Za-z]?)$").expect("size literal regex is valid")
});

/// Multiplier for a size suffix. Suffixes are case-sensitive binary multiples.
fn multiplier(suffix: &str) -> Option<u64> {
    match suffix {
        "" | "b" => Some(1),
        "K" => Some(KIB),
        "M" => Some(MIB),
        "G" => Some(GIB),
        _ => None,
    }
}

/// Parse a size literal into bytes.
///
/// `None` and the empty string mean "unspecified" and come back as `Ok(None)`.
pub fn parse_size(literal: Option<&str>) -> LocalvolResult<Option<u64>> {
    let literal = match literal {
        None | Some("") => return Ok(None),
        Some(s) => s,
    };

    let invalid = || LocalvolError::InvalidSizeLiteral(literal.to_string());

    let captures = SIZE_LITERAL.captures(literal).ok_or_else(invalid)?;
    let factor = multiplier(&captures["suffix"]).ok_or_else(invalid)?;
    let digits: u64 = captures["digits"].parse().map_err(|_| invalid())?;

    digits.checked_mul(factor).map(Some).ok_or_else(invalid)
}

/// Whole gigabytes in `bytes`, rounded down. This is the unit quota is charged in.
pub fn whole_gigabytes(bytes: u64) -> u64 {
    bytes / GIB
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("512", 512)]
    #[case("512b", 512)]
    #[case("4K", 4 * 1024)]
    #[case("3M", 3 * 1024 * 1024)]
    #[case("10G", 10 * 1024 * 1024 * 1024)]
    #[case("0", 0)]
    fn test_parse_valid(#[case] literal: &str, #[case] expected: u64) {
        assert_eq!(parse_size(Some(literal)).unwrap(), Some(expected));
    }

    #[rstest]
    #[case("5X")]
    #[case("10g")]
    #[case("10k")]
    #[case("G")]
    #[case("1.5G")]
    #[case("10GB")]
    #[case(" 10G")]
    #[case("-1")]
    #[case("99999999999999999999G")]
    fn test_parse_invalid(#[case] literal: &str) {
        let err = parse_size(Some(literal)).unwrap_err();
        assert!(
            matches!(err, LocalvolError::InvalidSizeLiteral(ref s) if s == literal),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_unspecified_passes_through() {
        assert_eq!(parse_size(None).unwrap(), None);
        assert_eq!(parse_size(Some("")).unwrap(), None);
    }

    #[test]
    fn test_overflowing_multiplication_rejected() {
        let literal = format!("{}G", u64::MAX / 2);
        assert!(parse_size(Some(&literal)).is_err());
    }

    #[test]
    fn test_whole_gigabytes_rounds_down() {
        assert_eq!(whole_gigabytes(GIB - 1), 0);
        assert_eq!(whole_gigabytes(GIB), 1);
        assert_eq!(whole_gigabytes(5 * GIB + 17), 5);
    }
}
