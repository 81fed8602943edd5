/// BMI arithmetic and the threshold fallback classification.
///
/// The fallback bands are a simplified adult/adolescent table. The real
/// classification for school-age children is Z-score based and assigned by
/// an external procedure; these bands only fill in when that procedure left
/// no category, and they are not expected to agree with it.

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

/// BMI = kg / m^2, rounded to 4 decimals. Zero or negative height yields 0.
pub fn bmi(weight_kg: f64, height_cm: f64) -> f64 {
    if height_cm <= 0.0 {
        return 0.0;
    }
    let height_m = height_cm / 100.0;
    round4(weight_kg / (height_m * height_m))
}

/// Fallback band name for a BMI value.
pub fn fallback_band(bmi: f64) -> &'static str {
    if bmi < 16.0 {
        "Bajo peso severo"
    } else if bmi < 17.0 {
        "Bajo peso moderado"
    } else if bmi < 18.5 {
        "Bajo peso"
    } else if bmi < 25.0 {
        "Normal"
    } else if bmi < 30.0 {
        "Sobrepeso"
    } else if bmi < 35.0 {
        "Obesidad"
    } else {
        "Obesidad severa"
    }
}

/// Match keyword for a band: first word, lowercased. Category lookup is a
/// case-insensitive containment scan over the category names, in table
/// order, so e.g. "bajo" resolves to the first "Bajo peso" variant present.
pub fn band_keyword(band: &str) -> String {
    band.split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase()
}
