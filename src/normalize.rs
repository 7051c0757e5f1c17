/// Reduces an identifier to its canonical digit form: non-digits are dropped
/// and leading zeros stripped (`"0042"` -> `"42"`, `"000"` -> `"0"`). Values
/// without any digit are returned trimmed instead of being erased.
pub fn normalize_numeric(value: &str) -> String {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return value.trim().to_string();
    }

    match digits.trim_start_matches('0') {
        "" => "0".to_string(),
        stripped => stripped.to_string(),
    }
}
