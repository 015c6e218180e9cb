//! Lesson and unit identifiers.
//!
//! A [`LessonCode`] looks like `B3.2.4`: subject letters, then unit,
//! sub-unit and lesson ordinal. Codes are the primary key for every catalog
//! lookup. Ordering is numeric per component, so `B3.2.4` sorts before
//! `B3.2.10`, and prefix queries compare whole components so `B3.2` never
//! matches `B3.20.1`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

static CODE_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^A-Za-z0-9])([A-Z]{1,3})(\d+)\.(\d+)\.(\d+)(?:$|[^0-9])")
        .expect("lesson code pattern is valid")
});

/// Structured lesson identifier (`<subject><unit>.<sub-unit>.<lesson>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LessonCode {
    subject: String,
    unit: u32,
    sub_unit: u32,
    lesson: u32,
}

/// Unit identifier (`<subject><unit>.<sub-unit>`), e.g. `C4.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitCode {
    subject: String,
    unit: u32,
    sub_unit: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid lesson code '{0}': expected e.g. B3.2.4")]
pub struct ParseCodeError(pub String);

impl LessonCode {
    /// Finds the first lesson code embedded in free text such as a file
    /// stem (`"C3.1.3 Electronic Configuration"`) or a title slide.
    pub fn find_in(text: &str) -> Option<Self> {
        let caps = CODE_IN_TEXT.captures(text)?;
        Some(Self {
            subject: caps[1].to_ascii_uppercase(),
            unit: caps[2].parse().ok()?,
            sub_unit: caps[3].parse().ok()?,
            lesson: caps[4].parse().ok()?,
        })
    }

    pub fn unit(&self) -> UnitCode {
        UnitCode {
            subject: self.subject.clone(),
            unit: self.unit,
            sub_unit: self.sub_unit,
        }
    }

    /// Human subject name derived from the subject letter.
    pub fn subject_name(&self) -> &'static str {
        match self.subject.as_str() {
            "B" => "Biology",
            "C" => "Chemistry",
            "P" => "Physics",
            _ => "Science",
        }
    }

    /// Component-wise prefix match. `"B3.2"`, `"b3.2."` and `"B"` all match
    /// `B3.2.4`; `"B3.2"` does not match `B3.20.1`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.trim().trim_end_matches('.');
        if prefix.is_empty() {
            return true;
        }
        let parts: Vec<&str> = prefix.split('.').collect();
        if parts.len() == 1 && parts[0].chars().all(|c| c.is_ascii_alphabetic()) {
            return parts[0].eq_ignore_ascii_case(&self.subject);
        }
        let own = self.components();
        if parts.len() > own.len() {
            return false;
        }
        parts
            .iter()
            .zip(own.iter())
            .all(|(p, o)| p.trim().eq_ignore_ascii_case(o))
    }

    fn components(&self) -> [String; 3] {
        [
            format!("{}{}", self.subject, self.unit),
            self.sub_unit.to_string(),
            self.lesson.to_string(),
        ]
    }
}

impl fmt::Display for LessonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!(
            "{}{}.{}.{}",
            self.subject, self.unit, self.sub_unit, self.lesson
        ))
    }
}

impl FromStr for LessonCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match Self::find_in(trimmed) {
            Some(code) if code.to_string().eq_ignore_ascii_case(trimmed) => Ok(code),
            _ => Err(ParseCodeError(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for LessonCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for UnitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{}{}.{}", self.subject, self.unit, self.sub_unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> LessonCode {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_normalises_case() {
        let c = code("c4.2.14");
        assert_eq!(c.to_string(), "C4.2.14");
        assert_eq!(c.unit().to_string(), "C4.2");
        assert_eq!(c.subject_name(), "Chemistry");
    }

    #[test]
    fn rejects_partial_codes() {
        assert!("B3.2".parse::<LessonCode>().is_err());
        assert!("B3.2.4 extra".parse::<LessonCode>().is_err());
        assert!("".parse::<LessonCode>().is_err());
    }

    #[test]
    fn orders_numerically() {
        let mut codes = vec![code("B3.2.10"), code("B3.2.4"), code("B3.10.1"), code("B3.2.1")];
        codes.sort();
        let shown: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(shown, vec!["B3.2.1", "B3.2.4", "B3.2.10", "B3.10.1"]);
    }

    #[test]
    fn prefix_matches_whole_components() {
        let c = code("B3.2.4");
        assert!(c.has_prefix("B3.2"));
        assert!(c.has_prefix("b3.2."));
        assert!(c.has_prefix("B3"));
        assert!(c.has_prefix("B"));
        assert!(!c.has_prefix("B3.3"));
        assert!(!code("B3.20.1").has_prefix("B3.2"));
        assert!(!c.has_prefix("C"));
    }

    #[test]
    fn finds_code_in_file_names() {
        assert_eq!(
            LessonCode::find_in("C3.1.3 Electronic Configuration"),
            Some(code("C3.1.3"))
        );
        assert_eq!(
            LessonCode::find_in("B3.2.7_ReadNow_LPA"),
            Some(code("B3.2.7"))
        );
        assert_eq!(LessonCode::find_in("Lesson 3.2.1"), None);
        assert_eq!(LessonCode::find_in("C3.2.45"), Some(code("C3.2.45")));
    }
}
