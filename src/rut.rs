/// Chilean RUT check-digit validation (módulo 11).
///
/// Accepts formatted input ("12.345.678-5"), bare input ("123456785"), and a
/// lowercase check character. The dash is optional; when absent the last
/// character is taken as the check digit.
pub fn validate(rut: &str) -> bool {
    if rut.trim().is_empty() {
        return false;
    }

    let clean: String = rut
        .chars()
        .filter(|c| *c != '.' && *c != ' ')
        .collect::<String>()
        .to_uppercase();

    let (body, dv_input) = if clean.contains('-') {
        let parts: Vec<&str> = clean.split('-').collect();
        if parts.len() != 2 {
            return false;
        }
        (parts[0].to_string(), parts[1].to_string())
    } else {
        let mut chars = clean.chars();
        let Some(dv) = chars.next_back() else {
            return false;
        };
        let body: String = chars.collect();
        if body.is_empty() {
            return false;
        }
        (body, dv.to_string())
    };

    // The body must be a plain non-negative integer literal.
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let computed = compute_dv(&body);
    dv_input.len() == 1 && dv_input.chars().next() == Some(computed)
}

/// Compute the check character for a digit-only RUT body.
///
/// Digits are weighted right-to-left by the cyclic factor sequence
/// 2,3,4,5,6,7,2,3,... Raw value 11 maps to '0' and 10 to 'K'.
pub fn compute_dv(body: &str) -> char {
    let mut sum: u32 = 0;
    let mut factor: u32 = 2;
    for c in body.chars().rev() {
        sum += c.to_digit(10).unwrap_or(0) * factor;
        factor += 1;
        if factor > 7 {
            factor = 2;
        }
    }
    let raw = 11 - (sum % 11);
    match raw {
        11 => '0',
        10 => 'K',
        d => char::from_digit(d, 10).unwrap_or('0'),
    }
}
