//! Token amounts and chain identifier formats.
//!
//! Custodial balances are held in integer minor units (`10^decimals` per whole token). Addresses
//! and transaction signatures are base58 strings that decode to 32 and 64 bytes respectively.

use thiserror::Error;

/// Decoded length of a chain address.
pub const ADDRESS_BYTES: usize = 32;
/// Decoded length of a transaction signature.
pub const SIGNATURE_BYTES: usize = 64;

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("amount is empty")]
    EmptyAmount,
    #[error("amount is not a number: {0}")]
    NotANumber(String),
    #[error("amount has more than {0} decimal places")]
    TooPrecise(u8),
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount overflows")]
    Overflow,
    #[error("invalid base58 character {0:?}")]
    InvalidCharacter(char),
    #[error("expected {expected} bytes, decoded {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Minor units per whole token.
pub fn unit(decimals: u8) -> u64 {
    10u64.saturating_pow(u32::from(decimals))
}

/// Parses a user-supplied decimal amount (for example `"12.5"`) into minor units.
pub fn parse_amount(input: &str, decimals: u8) -> Result<u64, FormatError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FormatError::EmptyAmount);
    }
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(FormatError::NotANumber(input.to_string()));
    }
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !digits(whole) || !digits(fraction) {
        return Err(FormatError::NotANumber(input.to_string()));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(FormatError::TooPrecise(decimals));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| FormatError::Overflow)?
    };
    let mut padded = fraction.to_string();
    while padded.len() < usize::from(decimals) {
        padded.push('0');
    }
    let fraction: u64 = if padded.is_empty() {
        0
    } else {
        padded.parse().map_err(|_| FormatError::Overflow)?
    };

    let amount = whole
        .checked_mul(unit(decimals))
        .and_then(|v| v.checked_add(fraction))
        .ok_or(FormatError::Overflow)?;
    if amount == 0 {
        return Err(FormatError::NotPositive);
    }
    Ok(amount)
}

/// Formats minor units as a decimal string with exactly `decimals` places.
pub fn format_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let unit = unit(decimals);
    format!(
        "{}.{:0width$}",
        amount / unit,
        amount % unit,
        width = usize::from(decimals)
    )
}

/// Number of bytes a base58 string decodes to. Leading `1`s are leading zero bytes.
fn base58_decoded_len(input: &str) -> Result<usize, FormatError> {
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for c in input.chars() {
        let digit = BASE58_ALPHABET
            .iter()
            .position(|&a| char::from(a) == c)
            .ok_or(FormatError::InvalidCharacter(c))?;
        let mut carry = digit as u32;
        for byte in bytes.iter_mut() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.chars().take_while(|&c| c == '1').count();
    Ok(bytes.len() + leading_zeros)
}

fn validate_base58(input: &str, expected: usize) -> Result<(), FormatError> {
    let actual = base58_decoded_len(input)?;
    if actual != expected {
        return Err(FormatError::InvalidLength { expected, actual });
    }
    Ok(())
}

/// Validates a chain address and returns it trimmed.
pub fn validate_address(input: &str) -> Result<String, FormatError> {
    let trimmed = input.trim();
    validate_base58(trimmed, ADDRESS_BYTES)?;
    Ok(trimmed.to_string())
}

/// Validates a transaction signature and returns it trimmed.
pub fn validate_signature(input: &str) -> Result<String, FormatError> {
    let trimmed = input.trim();
    validate_base58(trimmed, SIGNATURE_BYTES)?;
    Ok(trimmed.to_string())
}

/// Exact comparison after trimming surrounding whitespace.
pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
    const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

    #[test]
    fn parses_decimal_amounts() {
        assert_eq!(parse_amount("12.5", 6), Ok(12_500_000));
        assert_eq!(parse_amount("7", 6), Ok(7_000_000));
        assert_eq!(parse_amount(".25", 2), Ok(25));
        assert_eq!(parse_amount("0", 6), Err(FormatError::NotPositive));
        assert_eq!(parse_amount("1.2345678", 6), Err(FormatError::TooPrecise(6)));
        assert!(matches!(parse_amount("-3", 6), Err(FormatError::NotANumber(_))));
        assert!(matches!(parse_amount("abc", 6), Err(FormatError::NotANumber(_))));
        assert_eq!(
            parse_amount("99999999999999999999", 6),
            Err(FormatError::Overflow)
        );
    }

    #[test]
    fn formats_with_fixed_precision() {
        assert_eq!(format_amount(1_960_000_000, 6), "1960.000000");
        assert_eq!(format_amount(5, 2), "0.05");
        assert_eq!(format_amount(5, 0), "5");
    }

    #[test]
    fn validates_addresses() {
        assert_eq!(validate_address(&format!(" {ADDRESS} ")), Ok(ADDRESS.to_string()));
        assert!(validate_address(SYSTEM_PROGRAM).is_ok());
        assert_eq!(
            validate_address("0OIl"),
            Err(FormatError::InvalidCharacter('0'))
        );
        assert!(matches!(
            validate_address("abc"),
            Err(FormatError::InvalidLength { .. })
        ));
    }

    #[test]
    fn addresses_are_not_signatures() {
        assert!(validate_signature(ADDRESS).is_err());
        let signature = "1".repeat(SIGNATURE_BYTES);
        assert!(validate_signature(&signature).is_ok());
    }

    #[test]
    fn address_match_is_exact() {
        assert!(addresses_match(ADDRESS, &format!("{ADDRESS}\n")));
        assert!(!addresses_match(ADDRESS, &ADDRESS[1..]));
    }
}
