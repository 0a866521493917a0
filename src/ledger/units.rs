use super::Amount;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount has more than {decimals} fractional digits")]
    TooPrecise { decimals: u8 },
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

/// Parses a decimal token amount such as `"10"` or `"0.25"` into minimal units.
pub fn parse_units(text: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::InvalidDigit(text.to_string()));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(UnitsError::InvalidDigit(text.to_string()));
    }
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise { decimals });
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or(UnitsError::Overflow)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<Amount>().map_err(|_| UnitsError::Overflow)?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padding = 10u128.pow((decimals as usize - frac.len()) as u32);
        frac.parse::<Amount>().map_err(|_| UnitsError::Overflow)? * padding
    };
    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or(UnitsError::Overflow)
}

/// Renders minimal units as a decimal string, trimming trailing zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    // past 38 decimals every u128 amount is below one whole token
    let (whole, frac) = match 10u128.checked_pow(decimals as u32) {
        Some(scale) => (amount / scale, amount % scale),
        None => (0, amount),
    };
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
