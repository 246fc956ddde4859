use std::{cmp::Ordering, fmt, str::FromStr};

/// A Kubernetes resource quantity, e.g. `10m`, `50Mi`, or `1e3`.
///
/// Quantities are compared by exact value, however large, so `100m` equals
/// `0.1` and `1Ki` equals `1024`. The original text is retained for display.
#[derive(Clone)]
pub struct Quantity {
    value: Decimal,
    text: String,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid number: {0:?}")]
    NotANumber(String),

    #[error("invalid suffix {0:?}: {expected}", expected = EXPECTED_SUFFIXES)]
    InvalidSuffix(String),

    #[error("quantity exponent is out of range")]
    Overflow,
}

const EXPECTED_SUFFIXES: &str = "expected one of 'n', 'u', 'm', 'k', 'M', 'G', 'T', 'P', 'E', \
    'Ki', 'Mi', 'Gi', 'Ti', 'Pi', 'Ei', or a decimal exponent";

/// Values finer than a billionth of a unit are rounded up.
const NANO_EXPONENT: i64 = -9;

/// An exact decimal, `digits * 10^exponent`.
///
/// `digits` has no leading or trailing zeros, so equal values have equal
/// representations. Zero has no digits and is never negative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    exponent: i64,
}

impl Quantity {
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.value.digits.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl std::hash::Hash for Quantity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({})", self.text)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Quantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // implements the same grammar as
        // https://github.com/kubernetes/apimachinery/blob/v0.30.0/pkg/api/resource/quantity.go#L34-L71

        /// Returns the power of two and the power of ten denoted by a suffix.
        fn suffix_exponents(suffix: &str) -> Result<(u32, i32), ParseError> {
            let exps = match suffix {
                "" => (0, 0),
                "Ki" => (10, 0),
                "Mi" => (20, 0),
                "Gi" => (30, 0),
                "Ti" => (40, 0),
                "Pi" => (50, 0),
                "Ei" => (60, 0),
                "n" => (0, -9),
                "u" => (0, -6),
                "m" => (0, -3),
                "k" => (0, 3),
                "M" => (0, 6),
                "G" => (0, 9),
                "T" => (0, 12),
                "P" => (0, 15),
                "E" => (0, 18),
                _ => {
                    let exp = suffix
                        .strip_prefix(['e', 'E'])
                        .and_then(|exp| exp.parse::<i32>().ok())
                        .ok_or_else(|| ParseError::InvalidSuffix(suffix.to_string()))?;
                    (0, exp)
                }
            };
            Ok(exps)
        }

        let text = s.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }

        let (is_negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(ParseError::NotANumber(text.to_string()));
        }

        let (exp2, exp10) = suffix_exponents(suffix)?;

        let fraction_digits = i64::try_from(fraction.len()).map_err(|_| ParseError::Overflow)?;
        let exponent = i64::from(exp10)
            .checked_sub(fraction_digits)
            .ok_or(ParseError::Overflow)?;
        let digits = whole
            .bytes()
            .chain(fraction.bytes())
            .map(|digit| digit - b'0')
            .collect();

        let mut value = Decimal::new(is_negative, digits, exponent);
        value.mul_pow2(exp2);
        value.round_up_to_nano();

        Ok(Quantity {
            value,
            text: text.to_string(),
        })
    }
}

// === impl Decimal ===

impl Decimal {
    fn new(negative: bool, digits: Vec<u8>, exponent: i64) -> Self {
        let mut value = Self {
            negative,
            digits,
            exponent,
        };
        value.normalize();
        value
    }

    fn normalize(&mut self) {
        let leading = self.digits.iter().take_while(|&&d| d == 0).count();
        self.digits.drain(..leading);
        while self.digits.last() == Some(&0) {
            self.digits.pop();
            self.exponent += 1;
        }
        if self.digits.is_empty() {
            *self = Self::default();
        }
    }

    /// Multiplies the value by `2^exp`, for binary suffixes (at most `Ei`).
    fn mul_pow2(&mut self, exp: u32) {
        let factor = 1u128 << exp;
        let mut carry = 0u128;
        for digit in self.digits.iter_mut().rev() {
            let product = u128::from(*digit) * factor + carry;
            *digit = (product % 10) as u8;
            carry = product / 10;
        }
        while carry > 0 {
            self.digits.insert(0, (carry % 10) as u8);
            carry /= 10;
        }
        self.normalize();
    }

    /// Rounds away from zero to a whole number of nano-units, as the API
    /// server does when it parses a quantity.
    fn round_up_to_nano(&mut self) {
        let excess = NANO_EXPONENT - self.exponent;
        if excess <= 0 || self.digits.is_empty() {
            return;
        }

        let keep = usize::try_from(excess)
            .map_or(0, |excess| self.digits.len().saturating_sub(excess));
        self.digits.truncate(keep);
        self.exponent = NANO_EXPONENT;

        // The dropped digits are never all zero, so the kept ones always round up.
        let mut carry = true;
        for digit in self.digits.iter_mut().rev() {
            if *digit == 9 {
                *digit = 0;
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            self.digits.insert(0, 1);
        }
        self.normalize();
    }

    fn cmp_magnitude(&self, other: &Self) -> Ordering {
        match (self.digits.is_empty(), other.digits.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        // Compare the positions of the most significant digits, then the
        // digits themselves from the most significant down.
        let leading = |value: &Self| value.exponent + value.digits.len() as i64;
        leading(self)
            .cmp(&leading(other))
            .then_with(|| self.digits.cmp(&other.digits))
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, false) => self.cmp_magnitude(other),
            (true, true) => other.cmp_magnitude(self),
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap_or_else(|e| panic!("{s:?} must parse: {e}"))
    }

    #[test]
    fn parses_decimal_si() {
        assert_eq!(q("100m"), q("0.1"));
        assert_eq!(q("1k"), q("1000"));
        assert_eq!(q("2G"), q("2000M"));
        assert_eq!(q("1500u"), q("1.5m"));
    }

    #[test]
    fn parses_binary_si() {
        assert_eq!(q("1Ki"), q("1024"));
        assert_eq!(q("50Mi"), q("52428800"));
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_ne!(q("1Gi"), q("1G"));
    }

    #[test]
    fn parses_exponents() {
        assert_eq!(q("1e3"), q("1k"));
        assert_eq!(q("1E3"), q("1000"));
        assert_eq!(q("5e-3"), q("5m"));
    }

    #[test]
    fn distinguishes_exa_from_exponent() {
        assert_eq!(q("1E"), q("1000P"));
        assert_eq!(q("1E0"), q("1"));
    }

    #[test]
    fn zero() {
        assert!(q("0").is_zero());
        assert!(q("0m").is_zero());
        assert!(q("0.0Gi").is_zero());
        assert!(!q("1n").is_zero());
    }

    #[test]
    fn rounds_up_below_nano() {
        assert_eq!(q("0.1n"), q("1n"));
        assert!(!q("0.0000000001").is_zero());
    }

    #[test]
    fn rounds_up_at_nano_boundary() {
        assert_eq!(q("1.0000000001"), q("1.000000001"));
        assert_eq!(q("0.9999999999"), q("1"));
        assert_eq!(q("1e-40"), q("1n"));
        assert_eq!(q("-1e-40"), q("-1n"));
    }

    #[test]
    fn compares_huge_values_exactly() {
        assert_eq!(q("1e30"), q("1000000000000000000000000000000"));
        assert_eq!(q("1e30"), q("1000000000000000P"));
        assert!(q("1e30") > q("10m"));
        assert!(q("1e99") > q("1e98"));
        assert_eq!(q("8Ei"), q("9223372036854775808"));
        assert_ne!(q("16Ei"), q("17Ei"));
        assert!(q("-1e30") < q("-10m"));
    }

    #[test]
    fn signed() {
        assert_eq!(q("+10m"), q("10m"));
        assert!(q("-10m") < q("0"));
        assert_ne!(q("-10m"), q("10m"));
    }

    #[test]
    fn orders_by_value() {
        assert!(q("10m") < q("30m"));
        assert!(q("1") > q("999m"));
        assert!(q("1Mi") > q("1M"));
    }

    #[test]
    fn displays_original_text() {
        assert_eq!(q("50Mi").to_string(), "50Mi");
        assert_eq!(q(" 10m ").as_str(), "10m");
    }

    #[test]
    fn invalid() {
        assert_eq!("".parse::<Quantity>().unwrap_err(), ParseError::Empty);
        assert_eq!(
            "m".parse::<Quantity>().unwrap_err(),
            ParseError::NotANumber("m".to_string())
        );
        assert_eq!(
            "1.2.3".parse::<Quantity>().unwrap_err(),
            ParseError::NotANumber("1.2.3".to_string())
        );
        assert_eq!(
            "10mb".parse::<Quantity>().unwrap_err(),
            ParseError::InvalidSuffix("mb".to_string())
        );
        assert_eq!(
            "1Ki1".parse::<Quantity>().unwrap_err(),
            ParseError::InvalidSuffix("Ki1".to_string())
        );
    }
}
