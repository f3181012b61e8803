//! Pick codec - one weaving row as heddle positions
//!
//! Pick data arrives from the weaving software as text like `"1011"`: `'1'`
//! raises the heddle, anything else leaves it lowered. Decoding never
//! fails. Falsy raw values (`false`, `null`, `""`, `0`) mean no row has
//! been published yet and decode to `None`, which is distinct from a valid
//! empty row.

use serde_json::Value;
use std::fmt;

/// One row of the pattern, one entry per heddle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pick {
    heddles: Vec<bool>,
}

impl Pick {
    pub fn new(heddles: Vec<bool>) -> Self {
        Self { heddles }
    }

    pub fn heddles(&self) -> &[bool] {
        &self.heddles
    }

    pub fn len(&self) -> usize {
        self.heddles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heddles.is_empty()
    }

    /// Number of raised heddles
    pub fn raised(&self) -> usize {
        self.heddles.iter().filter(|&&up| up).count()
    }

    pub fn into_heddles(self) -> Vec<bool> {
        self.heddles
    }
}

impl From<Vec<bool>> for Pick {
    fn from(heddles: Vec<bool>) -> Self {
        Self::new(heddles)
    }
}

impl fmt::Display for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &up in &self.heddles {
            f.write_str(if up { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Decode a text row; every character maps to one heddle
pub fn decode_str(row: &str) -> Pick {
    Pick::new(row.chars().map(|c| c == '1').collect())
}

/// Decode a raw store value
///
/// Strings decode per character. Numbers decode through their decimal text.
/// Arrays decode per element, with `1`, `"1"` and `true` as raised.
/// Falsy values, `true` and objects carry no row.
pub fn decode(raw: &Value) -> Option<Pick> {
    match raw {
        Value::String(row) if !row.is_empty() => Some(decode_str(row)),
        Value::Number(n) if !is_zero(n) => Some(decode_str(&n.to_string())),
        Value::Array(items) => Some(Pick::new(items.iter().map(is_raised).collect())),
        _ => None,
    }
}

fn is_zero(n: &serde_json::Number) -> bool {
    n.as_f64().map(|f| f == 0.0).unwrap_or(false)
}

fn is_raised(item: &Value) -> bool {
    match item {
        Value::Bool(up) => *up,
        Value::Number(n) => n.as_u64() == Some(1),
        Value::String(s) => s == "1",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_decode_bits() {
        assert_eq!(
            decode(&json!("101")),
            Some(Pick::new(vec![true, false, true]))
        );
        assert_eq!(
            decode(&json!("010")),
            Some(Pick::new(vec![false, true, false]))
        );
    }

    #[test]
    fn test_malformed_characters_are_lowered() {
        let pick = decode(&json!("1x2 1")).unwrap();
        assert_eq!(pick.heddles(), &[true, false, false, false, true]);
    }

    #[test]
    fn test_falsy_values_carry_no_pick() {
        assert_eq!(decode(&json!(false)), None);
        assert_eq!(decode(&Value::Null), None);
        assert_eq!(decode(&json!("")), None);
        assert_eq!(decode(&json!(0)), None);
        assert_eq!(decode(&json!(true)), None);
        assert_eq!(decode(&json!({"row": "101"})), None);
    }

    #[test]
    fn test_empty_array_is_a_valid_empty_row() {
        let pick = decode(&json!([])).unwrap();
        assert!(pick.is_empty());
    }

    #[test]
    fn test_numeric_row_uses_decimal_text() {
        assert_eq!(decode(&json!(1101)).unwrap().to_string(), "1101");
    }

    #[test]
    fn test_array_row() {
        let pick = decode(&json!([1, 0, true, "1", "x", null])).unwrap();
        assert_eq!(pick.heddles(), &[true, false, true, true, false, false]);
        assert_eq!(pick.raised(), 3);
    }

    proptest! {
        #[test]
        fn prop_decode_preserves_length_and_positions(row in "\\PC{1,64}") {
            let pick = decode_str(&row);
            let chars: Vec<char> = row.chars().collect();
            prop_assert_eq!(pick.len(), chars.len());
            for (i, c) in chars.iter().enumerate() {
                prop_assert_eq!(pick.heddles()[i], *c == '1');
            }
        }

        #[test]
        fn prop_bit_rows_survive_display(bits in proptest::collection::vec(any::<bool>(), 1..128)) {
            let pick = Pick::new(bits.clone());
            let decoded = decode(&Value::String(pick.to_string())).unwrap();
            prop_assert_eq!(decoded.into_heddles(), bits);
        }
    }
}
