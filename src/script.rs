//! Target-script character classes.
//!
//! Translated fields must contain only characters of the target writing
//! system. The ranges are configurable; the default is the CJK Unified
//! Ideographs block.

use std::fmt;
use std::ops::RangeInclusive;

use crate::error::AppError;

/// Default target script: CJK Unified Ideographs.
pub const DEFAULT_SCRIPT_RANGES: &str = "4E00-9FFF";

/// Full-width punctuation kept inside translated fields. ASCII punctuation
/// and spaces are not kept, so a stripped Latin word leaves no gap.
const TRANSLATED_PUNCTUATION: &[char] = &[
    '，', '。', '、', '；', '：', '！', '？', '（', '）', '《', '》', '“', '”', '·', '…', '—',
];

/// Currency marks the normalizer keeps for prices.
const CURRENCY_MARKS: &[char] = &['¥', '€', '£'];

/// Set of Unicode scalar ranges making up the target script.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScriptRanges {
    ranges: Vec<RangeInclusive<u32>>,
}

impl ScriptRanges {
    /// Parses a comma-separated list of hex ranges, e.g. `4E00-9FFF,3400-4DBF`.
    ///
    /// A single code point (`3007`) is accepted as a one-element range.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut ranges = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = match part.split_once('-') {
                Some((start, end)) => (parse_code_point(start, raw)?, parse_code_point(end, raw)?),
                None => {
                    let cp = parse_code_point(part, raw)?;
                    (cp, cp)
                }
            };
            if start > end {
                return Err(AppError::configuration(format!(
                    "invalid TARGET_SCRIPT_RANGES={raw:?}; range {part:?} is reversed"
                )));
            }
            ranges.push(start..=end);
        }

        if ranges.is_empty() {
            return Err(AppError::configuration(format!(
                "invalid TARGET_SCRIPT_RANGES={raw:?}; expected at least one range"
            )));
        }
        Ok(Self { ranges })
    }

    /// Returns true when `ch` belongs to the target script.
    pub fn contains(&self, ch: char) -> bool {
        let cp = ch as u32;
        self.ranges.iter().any(|r| r.contains(&cp))
    }

    /// Keeps only target-script characters and whitelisted punctuation, trimmed.
    pub fn sanitize_translated(&self, raw: &str) -> String {
        raw.chars()
            .filter(|&ch| self.contains(ch) || TRANSLATED_PUNCTUATION.contains(&ch))
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Character allow-list used while repairing raw completions.
    ///
    /// Printable ASCII, the target script, translated-field punctuation and a
    /// few currency marks. Anything [`Self::sanitize_translated`] keeps passes.
    pub fn allows_in_completion(&self, ch: char) -> bool {
        matches!(ch, ' '..='~')
            || self.contains(ch)
            || TRANSLATED_PUNCTUATION.contains(&ch)
            || CURRENCY_MARKS.contains(&ch)
    }
}

impl Default for ScriptRanges {
    fn default() -> Self {
        Self {
            ranges: vec![0x4E00..=0x9FFF],
        }
    }
}

impl fmt::Display for ScriptRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .ranges
            .iter()
            .map(|r| format!("{:04X}-{:04X}", r.start(), r.end()))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_code_point(raw: &str, full: &str) -> Result<u32, AppError> {
    let trimmed = raw.trim().trim_start_matches("U+").trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16)
        .ok()
        .filter(|cp| char::from_u32(*cp).is_some())
        .ok_or_else(|| {
            AppError::configuration(format!(
                "invalid TARGET_SCRIPT_RANGES={full:?}; {raw:?} is not a hex code point"
            ))
        })
}
