//! Plate text normalization and fuzzy registry matching
//!
//! OCR output is reduced to a token of uppercase letters, digits and hyphens.
//! Registry plates are matched against the token's bare character sequence
//! while tolerating any run of spaces or hyphens between characters, so
//! "ABC 123", "ABC123" and "A-B-C-1-2-3" all resolve to the same vehicle.

use std::collections::HashMap;

/// Minimum alphanumeric characters for a token to be usable
const MIN_TOKEN_ALNUM: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// Fewer than two alphanumeric characters survived cleaning
    TooShort { alnum: usize },
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::TooShort { alnum } => {
                write!(f, "plate too short ({alnum} alphanumeric characters)")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Cleaned plate text: uppercase ASCII letters, digits and hyphens only
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlateToken(String);

impl PlateToken {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of letters and digits, ignoring hyphens
    pub fn alnum_count(&self) -> usize {
        self.0.chars().filter(char::is_ascii_alphanumeric).count()
    }

    /// Token without separators
    pub fn bare(&self) -> String {
        self.0.chars().filter(char::is_ascii_alphanumeric).collect()
    }

    /// Replace characters according to a fixed substitution table
    pub fn substitute(&self, table: &HashMap<char, char>) -> PlateToken {
        if table.is_empty() {
            return self.clone();
        }
        PlateToken(self.0.chars().map(|c| *table.get(&c).unwrap_or(&c)).collect())
    }
}

impl std::fmt::Display for PlateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clean raw OCR text into a plate token
pub fn normalize(raw: &str) -> Result<PlateToken, NormalizeError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let token = PlateToken(cleaned);
    let alnum = token.alnum_count();
    if alnum < MIN_TOKEN_ALNUM {
        return Err(NormalizeError::TooShort { alnum });
    }
    Ok(token)
}

#[inline]
fn is_separator(c: char) -> bool {
    c == '-' || c.is_whitespace()
}

/// Interleaving-tolerant pattern built from a token's bare sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatePattern {
    chars: Vec<char>,
}

impl PlatePattern {
    pub fn new(token: &PlateToken) -> Self {
        Self { chars: token.bare().chars().collect() }
    }

    /// Bare sequence the pattern was built from
    pub fn bare(&self) -> String {
        self.chars.iter().collect()
    }

    /// Match the pattern at the start of `input`; returns chars consumed.
    /// Separators are only skipped between pattern characters.
    fn match_prefix(&self, input: &[char]) -> Option<usize> {
        if self.chars.is_empty() {
            return None;
        }
        let mut pos = 0;
        for (i, want) in self.chars.iter().enumerate() {
            if i > 0 {
                while pos < input.len() && is_separator(input[pos]) {
                    pos += 1;
                }
            }
            let got = input.get(pos)?;
            if !got.eq_ignore_ascii_case(want) {
                return None;
            }
            pos += 1;
        }
        Some(pos)
    }

    /// Whole-string match
    pub fn matches_exact(&self, candidate: &str) -> bool {
        let input: Vec<char> = candidate.chars().collect();
        self.match_prefix(&input) == Some(input.len())
    }

    /// Match anywhere inside the candidate
    pub fn matches_within(&self, candidate: &str) -> bool {
        let input: Vec<char> = candidate.chars().collect();
        (0..input.len()).any(|start| self.match_prefix(&input[start..]).is_some())
    }

    /// First item whose plate matches exactly, else first substring match.
    /// Items are examined in the order given.
    pub fn best_match<'a, T, F>(&self, items: &'a [T], plate_of: F) -> Option<&'a T>
    where
        F: Fn(&T) -> &str,
    {
        items
            .iter()
            .find(|item| self.matches_exact(plate_of(item)))
            .or_else(|| items.iter().find(|item| self.matches_within(plate_of(item))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> PlatePattern {
        PlatePattern::new(&normalize(raw).unwrap())
    }

    #[test]
    fn test_normalize_strips_and_uppercases() {
        assert_eq!(normalize("a b-C1!!2").unwrap().as_str(), "AB-C12");
        assert_eq!(normalize("  xyz 999 ").unwrap().as_str(), "XYZ999");
    }

    #[test]
    fn test_normalize_rejects_short() {
        assert_eq!(normalize("A"), Err(NormalizeError::TooShort { alnum: 1 }));
        assert_eq!(normalize("--!!"), Err(NormalizeError::TooShort { alnum: 0 }));
        assert_eq!(normalize("-A-"), Err(NormalizeError::TooShort { alnum: 1 }));
        assert!(normalize("A1").is_ok());
    }

    #[test]
    fn test_normalize_drops_non_ascii() {
        assert_eq!(normalize("ÄBC·123").unwrap().as_str(), "BC123");
    }

    #[test]
    fn test_token_bare_and_count() {
        let token = normalize("AB-C12").unwrap();
        assert_eq!(token.bare(), "ABC12");
        assert_eq!(token.alnum_count(), 5);
    }

    #[test]
    fn test_substitute() {
        let mut table = HashMap::new();
        table.insert('V', 'Y');
        let token = normalize("NVE 123").unwrap();
        assert_eq!(token.substitute(&table).as_str(), "NYE123");
        assert_eq!(token.substitute(&HashMap::new()), token);
    }

    #[test]
    fn test_exact_match_tolerates_separators() {
        let p = pattern("ABC 123");
        assert!(p.matches_exact("ABC123"));
        assert!(p.matches_exact("A-B-C-1-2-3"));
        assert!(p.matches_exact("abc 123"));
        assert!(p.matches_exact("AB - C 1\t23"));
        assert!(!p.matches_exact("XYZ123"));
        assert!(!p.matches_exact("ABC1234"));
        assert!(!p.matches_exact(" ABC123"));
    }

    #[test]
    fn test_substring_match() {
        let p = pattern("ABC123");
        assert!(!p.matches_exact("PH ABC-123"));
        assert!(p.matches_within("PH ABC-123"));
        assert!(p.matches_within("ABC 1 2 3 X"));
        assert!(!p.matches_within("AB1C23"));
    }

    #[test]
    fn test_best_match_prefers_exact() {
        let plates = vec!["ZZABC123", "A-B-C-1-2-3", "ABC123"];
        let p = pattern("ABC 123");
        assert_eq!(p.best_match(&plates, |s| s), Some(&"A-B-C-1-2-3"));
    }

    #[test]
    fn test_best_match_falls_back_to_substring() {
        let plates = vec!["XYZ123", "ZZABC123", "QABC123"];
        let p = pattern("ABC123");
        assert_eq!(p.best_match(&plates, |s| s), Some(&"ZZABC123"));
    }

    #[test]
    fn test_best_match_none() {
        let plates = vec!["XYZ123"];
        assert_eq!(pattern("ABC123").best_match(&plates, |s| s), None);
        let empty: Vec<&str> = Vec::new();
        assert_eq!(pattern("ABC123").best_match(&empty, |s| s), None);
    }

    #[test]
    fn test_hyphenated_token_pattern() {
        let p = pattern("AB-C12");
        assert_eq!(p.bare(), "ABC12");
        assert!(p.matches_exact("ABC 12"));
    }
}
