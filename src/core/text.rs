//! Text front-end for the voice cloner: normalization, sentence splitting
//! and vocabulary tokenization.

use crate::error::{Result, ServiceError};
use std::{collections::HashMap, fs, path::Path};

const ABBREVIATIONS: &[&str] = &["mr", "mrs", "ms", "dr", "st", "vs", "etc", "e.g", "i.e", "prof", "jr", "sr"];

pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push_str(" - "),
            '&' => out.push_str(" and "),
            '%' => out.push_str(" percent "),
            '@' => out.push_str(" at "),
            '+' => out.push_str(" plus "),
            c if c.is_whitespace() => out.push(' '),
            c => out.extend(c.to_lowercase()),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ends_with_abbreviation(buf: &str) -> bool {
    let word = buf
        .trim_end_matches('.')
        .rsplit(' ')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

/// Splits on sentence punctuation followed by whitespace, then breaks
/// anything longer than `max_chars` at the last comma or space that fits.
pub fn split_sentences(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut cur = String::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        cur.push(c);
        if matches!(c, '.' | '!' | '?' | '…' | ';') {
            // Keep closing quotes/brackets with the sentence they end.
            while i + 1 < chars.len() && matches!(chars[i + 1], '"' | '\'' | ')' | ']') {
                i += 1;
                cur.push(chars[i]);
            }
            let at_boundary = chars.get(i + 1).map_or(true, |n| n.is_whitespace());
            if at_boundary && !(c == '.' && ends_with_abbreviation(&cur)) {
                push_trimmed(&mut sentences, &cur);
                cur.clear();
            }
        }
        i += 1;
    }
    push_trimmed(&mut sentences, &cur);

    sentences
        .into_iter()
        .flat_map(|s| enforce_limit(&s, max_chars.max(1)))
        .collect()
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let t = s.trim();
    if !t.is_empty() {
        out.push(t.to_string());
    }
}

fn enforce_limit(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest: Vec<char> = sentence.chars().collect();

    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|c| matches!(c, ',' | ':' | ';'))
            .map(|p| p + 1)
            .or_else(|| window.iter().rposition(|c| c.is_whitespace()))
            .filter(|&p| p > 0)
            .unwrap_or(max_chars);

        let head: String = rest[..cut].iter().collect();
        push_trimmed(&mut parts, &head);
        rest = rest[cut..].to_vec();
    }
    let tail: String = rest.into_iter().collect();
    push_trimmed(&mut parts, &tail);
    parts
}

pub const SPACE_TOKEN: &str = "[SPACE]";
pub const START_TOKEN: &str = "[START]";
pub const STOP_TOKEN: &str = "[STOP]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Greedy longest-match tokenizer over a flat `token -> id` vocabulary.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: HashMap<String, i64>,
    max_token_chars: usize,
}

impl Tokenizer {
    pub fn new(vocab: HashMap<String, i64>) -> Self {
        let max_token_chars = vocab
            .keys()
            .filter(|k| !(k.starts_with('[') && k.ends_with(']')))
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(1);
        Self {
            vocab,
            max_token_chars,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let vocab: HashMap<String, i64> = serde_json::from_str(json)?;
        if vocab.is_empty() {
            return Err(ServiceError::Manifest("vocabulary is empty".into()));
        }
        Ok(Self::new(vocab))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn language_token(lang: &str) -> String {
        format!("[{lang}]")
    }

    pub fn supports_language(&self, lang: &str) -> bool {
        self.vocab.contains_key(&Self::language_token(lang))
    }

    pub fn encode(&self, text: &str, lang: &str) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        if let Some(&id) = self.vocab.get(&Self::language_token(lang)) {
            ids.push(id);
        }
        if let Some(&id) = self.vocab.get(START_TOKEN) {
            ids.push(id);
        }
        let prefix = ids.len();

        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == ' ' {
                if let Some(&id) = self.vocab.get(SPACE_TOKEN).or_else(|| self.vocab.get(" ")) {
                    ids.push(id);
                }
                i += 1;
                continue;
            }

            let longest = (1..=self.max_token_chars.min(chars.len() - i))
                .rev()
                .find_map(|len| {
                    let piece: String = chars[i..i + len].iter().collect();
                    self.vocab.get(&piece).map(|&id| (id, len))
                });

            match longest {
                Some((id, len)) => {
                    ids.push(id);
                    i += len;
                }
                None => {
                    if let Some(&id) = self.vocab.get(UNK_TOKEN) {
                        ids.push(id);
                    }
                    i += 1;
                }
            }
        }

        if ids.len() == prefix {
            return Err(ServiceError::InvalidInput(format!(
                "text `{text}` produces no tokens"
            )));
        }
        if let Some(&id) = self.vocab.get(STOP_TOKEN) {
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_collapses() {
        assert_eq!(
            normalize_text("  Hello\n\tWORLD  &  “friends” "),
            "hello world and \"friends\""
        );
        assert_eq!(normalize_text("50% off"), "50 percent off");
    }

    #[test]
    fn abbreviations_do_not_end_sentences() {
        let s = split_sentences("Dr. Smith arrived. He sat down!", 250);
        assert_eq!(s, vec!["Dr. Smith arrived.", "He sat down!"]);
    }

    #[test]
    fn decimal_points_stay_inside_sentences() {
        let s = split_sentences("Pi is 3.14 roughly. Yes.", 250);
        assert_eq!(s, vec!["Pi is 3.14 roughly.", "Yes."]);
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        let s = split_sentences("She said \"go.\" Then left", 250);
        assert_eq!(s, vec!["She said \"go.\"", "Then left"]);
    }

    #[test]
    fn long_sentences_break_at_commas_then_spaces() {
        let s = split_sentences("one two, three four five six", 12);
        assert_eq!(s, vec!["one two,", "three four", "five six"]);
        for part in &s {
            assert!(part.chars().count() <= 12);
        }
    }

    #[test]
    fn unbreakable_words_are_hard_cut() {
        let s = split_sentences("abcdefghij", 4);
        assert_eq!(s, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn empty_text_has_no_sentences() {
        assert!(split_sentences("   ", 10).is_empty());
    }
}
