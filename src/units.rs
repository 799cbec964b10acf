//! Unit registry.
//!
//! Haystack numbers carry a unit *tag*; the unit is part of the value's
//! identity and no conversion is performed. The registry only folds common
//! spelled-out aliases onto their canonical symbol so that `50percent` and
//! `50%` compare equal. Unknown units pass through untouched.
//!
//! The table is built once per process behind a `lazy_static` guard and is
//! read-only afterwards.

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref UNIT_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("percent", "%");
        m.insert("celsius", "°C");
        m.insert("degC", "°C");
        m.insert("fahrenheit", "°F");
        m.insert("degF", "°F");
        m.insert("kelvin", "K");
        m.insert("degK", "K");
        m.insert("square_foot", "ft²");
        m.insert("square_meter", "m²");
        m.insert("square_metre", "m²");
        m.insert("cubic_foot", "ft³");
        m.insert("cubic_meter", "m³");
        m.insert("cubic_metre", "m³");
        m.insert("liter", "L");
        m.insert("litre", "L");
        m.insert("hour", "h");
        m.insert("minute", "min");
        m.insert("second", "s");
        m.insert("us_dollar", "$");
        m.insert("USD", "$");
        m.insert("british_pound", "£");
        m.insert("GBP", "£");
        m.insert("euro", "€");
        m.insert("EUR", "€");
        m.insert("japanese_yen", "¥");
        m.insert("JPY", "¥");
        m
    };
}

/// Fold a unit spelling onto its canonical symbol.
pub fn canonical(unit: &str) -> &str {
    UNIT_ALIASES.get(unit).copied().unwrap_or(unit)
}

/// True when the character may start or continue a unit token.
pub fn is_unit_char(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '%' | '_' | '/' | '$') || ('\u{80}'..='\u{ffff}').contains(&c)
}
