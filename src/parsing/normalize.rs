use regex::Regex;

use crate::error::ParseFault;

/// Cleans raw OCR text line by line. Line count is preserved so positions in
/// the normalized text map back onto the source lines.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    separated_time: Regex,
    digit_run: Regex,
    hour_part: Regex,
    minute_part: Regex,
    disallowed: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self, ParseFault> {
        Ok(Self {
            separated_time: compile_builtin(
                "separated time",
                r"^(?P<hour>[0-9OoIl|]{1,2})(?P<sep>[:.\-])(?P<minute>[0-9OoIl|]{2})$",
            )?,
            digit_run: compile_builtin("digit run", r"^[0-9OoIl|]{4}$")?,
            hour_part: compile_builtin("hour part", r"^[0-9OoIl|]{1,2}$")?,
            minute_part: compile_builtin("minute part", r"^[0-9OoIl|]{2}$")?,
            disallowed: compile_builtin("disallowed characters", r"[^\w\s:.\-,]")?,
        })
    }

    pub fn normalize(&self, text: &str) -> String {
        text.lines()
            .map(|line| self.normalize_line(line))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn normalize_line(&self, line: &str) -> String {
        let tokens = line.split_whitespace().collect::<Vec<&str>>();
        let repaired = self.repair_time_tokens(&tokens);
        let stripped = self.disallowed.replace_all(&repaired, "");
        stripped.split_whitespace().collect::<Vec<&str>>().join(" ")
    }

    /// Glyph and separator repair only touches time-like tokens. Colon forms
    /// are trusted anywhere; every other rendering needs a header row, so a
    /// data line such as "1230 deg" or "12.50 observed" keeps its number.
    fn repair_time_tokens(&self, tokens: &[&str]) -> String {
        let header_context = self.is_header_row(tokens);
        let mut repaired = Vec::with_capacity(tokens.len());
        let mut index = 0usize;

        while index < tokens.len() {
            let token = tokens[index];
            let next = tokens.get(index + 1).copied();

            if let Some(label) = self.repair_separated(token, header_context) {
                repaired.push(label);
                index += 1;
                continue;
            }

            if header_context && self.digit_run.is_match(token) && has_digit(token) {
                let fixed = fix_glyphs(token);
                match crate::model::HourLabel::parse(&fixed) {
                    Some(label) => repaired.push(label.to_string()),
                    None => repaired.push(fixed),
                }
                index += 1;
                continue;
            }

            if header_context
                && let Some(minute) = next
                && self.hour_part.is_match(token)
                && self.minute_part.is_match(minute)
                && (has_digit(token) || has_digit(minute))
            {
                repaired.push(format!("{}:{}", fix_glyphs(token), fix_glyphs(minute)));
                index += 2;
                continue;
            }

            repaired.push(token.to_string());
            index += 1;
        }

        repaired.join(" ")
    }

    fn repair_separated(&self, token: &str, header_context: bool) -> Option<String> {
        let captures = self.separated_time.captures(token)?;
        let hour = captures.name("hour")?.as_str();
        let minute = captures.name("minute")?.as_str();
        let separator = captures.name("sep")?.as_str();

        if separator != ":" && !header_context {
            return None;
        }
        if !has_digit(hour) && !has_digit(minute) {
            return None;
        }

        Some(format!("{}:{}", fix_glyphs(hour), fix_glyphs(minute)))
    }

    /// A header row is made only of valid hour labels, either single tokens
    /// ("02:00", "0200") or whitespace-separated pairs ("02 00").
    fn is_header_row(&self, tokens: &[&str]) -> bool {
        if tokens.is_empty() {
            return false;
        }

        let single_labels = tokens.iter().all(|token| {
            (self.separated_time.is_match(token) || self.digit_run.is_match(token))
                && has_digit(token)
                && is_valid_label(&fix_glyphs(token))
        });
        if single_labels {
            return true;
        }

        tokens.len() % 2 == 0
            && tokens.chunks(2).all(|pair| {
                self.hour_part.is_match(pair[0])
                    && self.minute_part.is_match(pair[1])
                    && (has_digit(pair[0]) || has_digit(pair[1]))
                    && is_valid_label(&format!("{}:{}", fix_glyphs(pair[0]), fix_glyphs(pair[1])))
            })
    }
}

pub(crate) fn compile_builtin(name: &'static str, pattern: &str) -> Result<Regex, ParseFault> {
    Regex::new(pattern).map_err(|source| ParseFault::BuiltinPattern { name, source })
}

fn has_digit(value: &str) -> bool {
    value.chars().any(|ch| ch.is_ascii_digit())
}

fn is_valid_label(value: &str) -> bool {
    crate::model::HourLabel::parse(value).is_some()
}

/// Maps OCR-confusable glyphs onto the digits they usually stand for.
pub fn fix_glyphs(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            'O' | 'o' => '0',
            'I' | 'l' | '|' => '1',
            other => other,
        })
        .collect()
}

/// Counts occurrences of `needle` that are not part of a longer number or
/// word ("1450" is found in "1450F" but not in "14500").
pub fn standalone_occurrences(haystack: &str, needle: &str) -> usize {
    let needle = needle.trim();
    if needle.is_empty() {
        return 0;
    }

    let numeric = needle
        .chars()
        .next()
        .map(|ch| ch.is_ascii_digit() || ch == '-')
        .unwrap_or(false);
    let continues = |ch: char| {
        if numeric {
            ch.is_ascii_digit() || ch == '.'
        } else {
            ch.is_alphanumeric()
        }
    };

    haystack
        .match_indices(needle)
        .filter(|(start, matched)| {
            let before = haystack[..*start].chars().next_back();
            let after = haystack[start + matched.len()..].chars().next();
            !before.is_some_and(continues) && !after.is_some_and(continues)
        })
        .count()
}
