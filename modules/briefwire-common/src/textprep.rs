//! Text preparation: canonical hashing, preview extraction, language
//! detection, footer stripping, summary post-processing, lead-sentence
//! selection. All functions are pure so the pipeline stages stay
//! deterministic and testable.

use sha2::{Digest, Sha256};

// --- Hashing ---

/// Normalize text for fingerprinting: lowercase, collapsed whitespace.
/// Stable across superficial edits (casing, spacing, trailing newlines).
pub fn normalize_for_hash(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Canonical fingerprint used for strict dedup and the summary cache.
pub fn canonical_hash(text: &str) -> String {
    sha256_hex(&normalize_for_hash(text))
}

/// Bullet fingerprint: first 16 bytes of sha256 over the normalized text.
pub fn bullet_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_for_hash(text).as_bytes());
    hex::encode(&digest[..16])
}

// --- Preview extraction ---

/// Pull a short preview string out of the media payload, if any.
/// Telegram-shaped payloads carry link previews under `webpage`.
pub fn extract_preview(media_json: Option<&serde_json::Value>) -> Option<String> {
    let media = media_json?;
    let candidates = [
        media.pointer("/webpage/description"),
        media.pointer("/webpage/title"),
        media.get("description"),
        media.get("title"),
        media.get("caption"),
    ];
    for c in candidates.into_iter().flatten() {
        if let Some(s) = c.as_str() {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

// --- Language handling ---

const UKRAINIAN_LETTERS: [char; 8] = ['Є', 'є', 'І', 'і', 'Ї', 'ї', 'Ґ', 'ґ'];

pub fn contains_ukrainian_letters(text: &str) -> bool {
    text.chars().any(|c| UKRAINIAN_LETTERS.contains(&c))
}

/// Script-ratio language detection. Ukrainian-specific letters win outright;
/// otherwise a quarter of the letters being Cyrillic reads as Russian, any
/// Latin letters read as English. Returns None for text with no letters.
pub fn detect_language(text: &str) -> Option<&'static str> {
    if contains_ukrainian_letters(text) {
        return Some("uk");
    }
    let mut cyrillic = 0usize;
    let mut latin = 0usize;
    let mut letters = 0usize;
    for c in text.chars() {
        if c.is_alphabetic() {
            letters += 1;
            if ('\u{0400}'..='\u{04FF}').contains(&c) {
                cyrillic += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
    }
    if letters == 0 {
        return None;
    }
    if cyrillic * 4 >= letters {
        Some("ru")
    } else if latin > 0 {
        Some("en")
    } else {
        None
    }
}

/// Normalize a language tag or name to a bare two-letter code.
pub fn normalize_language(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "russian" | "русский" => return "ru".to_string(),
        "ukrainian" | "українська" => return "uk".to_string(),
        "english" => return "en".to_string(),
        _ => {}
    }
    lower
        .split(|c| c == '-' || c == '_')
        .next()
        .unwrap_or("")
        .to_string()
}

// --- Structural checks ---

pub fn has_link(text: &str) -> bool {
    text.contains("http://") || text.contains("https://") || text.contains("t.me/")
}

/// Remove URLs from the text, leaving the rest untouched.
pub fn strip_urls(text: &str) -> String {
    text.split_whitespace()
        .filter(|tok| !tok.starts_with("http://") && !tok.starts_with("https://") && !tok.starts_with("t.me/"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn has_letters_or_digits(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

/// True for messages that carry no alphanumeric content at all
/// (emoji, dingbats, punctuation) but are not pure whitespace.
pub fn is_emoji_only(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && !has_letters_or_digits(trimmed)
}

/// Strip trailing footer lines: blank lines, bare links, bare
/// mentions/hashtags, and lines matching configured boilerplate phrases.
pub fn strip_footer(text: &str, phrases: &[String]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut end = lines.len();
    while end > 0 {
        let line = lines[end - 1].trim();
        if line.is_empty() || is_footer_line(line, phrases) {
            end -= 1;
        } else {
            break;
        }
    }
    lines[..end].join("\n").trim_end().to_string()
}

fn is_footer_line(line: &str, phrases: &[String]) -> bool {
    let lower = line.to_lowercase();
    if phrases.iter().any(|p| !p.is_empty() && lower.contains(p.as_str())) {
        return true;
    }
    // A line that is nothing but links, mentions, hashtags or separators.
    // Emoji runs are content, not structure; they must survive the strip
    // so the emoji-only check can see them.
    let mut saw_token = false;
    for tok in line.split_whitespace() {
        saw_token = true;
        let bare = tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '#');
        let is_structural = tok.starts_with("http://")
            || tok.starts_with("https://")
            || tok.starts_with("t.me/")
            || bare.starts_with('@')
            || bare.starts_with('#')
            || (bare.is_empty() && tok.chars().all(is_separator_char));
        if !is_structural {
            return false;
        }
    }
    saw_token
}

fn is_separator_char(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '—' | '–' | '―' | '…' | '•' | '·' | '⸻')
}

/// True when, after removing CTA phrases, links, and mentions, almost no
/// letters remain. Catches "subscribe to our channel" shells.
pub fn is_boilerplate_only(text: &str, cta_phrases: &[String]) -> bool {
    let mut lower = strip_urls(text).to_lowercase();
    let mut matched = false;
    for phrase in cta_phrases {
        if phrase.is_empty() {
            continue;
        }
        if lower.contains(phrase.as_str()) {
            matched = true;
            lower = lower.replace(phrase.as_str(), " ");
        }
    }
    if !matched {
        return false;
    }
    let residual_letters = lower
        .split_whitespace()
        .filter(|tok| !tok.starts_with('@') && !tok.starts_with('#'))
        .flat_map(|tok| tok.chars())
        .filter(|c| c.is_alphanumeric())
        .count();
    residual_letters < 15
}

/// A forwarded message whose own text is an empty shell around the forward.
pub fn is_forward_shell(text: &str) -> bool {
    text.trim().chars().count() < 20
}

// --- Sentences & summaries ---

/// Split text into sentences on terminal punctuation. Keeps the terminator.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '…') {
            let next_is_break = chars.peek().map(|n| n.is_whitespace()).unwrap_or(true);
            // Don't split decimals like "3.5" or "25.000".
            let prev_digit_dot = c == '.'
                && current.chars().rev().nth(1).map(|p| p.is_ascii_digit()).unwrap_or(false)
                && chars.peek().map(|n| n.is_ascii_digit()).unwrap_or(false);
            if next_is_break && !prev_digit_dot {
                let s = current.trim().to_string();
                if !s.is_empty() {
                    sentences.push(s);
                }
                current.clear();
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Truncate to at most `max_chars` characters on a word boundary,
/// appending an ellipsis when something was cut.
pub fn truncate_on_word_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(1);
    let prefix: String = text.chars().take(budget).collect();
    let cut = match prefix.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => prefix[..pos].trim_end().to_string(),
        _ => prefix,
    };
    format!("{cut}…")
}

/// Clean an oracle summary: strip one configured prefix, collapse
/// whitespace, keep the first sentence (plus a short second one), and
/// truncate to the character budget on a word boundary.
pub fn postprocess_summary(raw: &str, prefixes: &[String], max_chars: usize) -> String {
    let mut text = raw.trim().to_string();
    let text_lower = text.to_lowercase();
    for prefix in prefixes {
        if prefix.is_empty() {
            continue;
        }
        let prefix_lower = prefix.to_lowercase();
        if text_lower.starts_with(&prefix_lower) {
            let skip = prefix.chars().count();
            text = text
                .chars()
                .skip(skip)
                .collect::<String>()
                .trim_start_matches([':', '-', ' '])
                .to_string();
            break;
        }
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentences = split_sentences(&collapsed);
    let mut summary = match sentences.first() {
        Some(first) => first.clone(),
        None => return String::new(),
    };
    if let Some(second) = sentences.get(1) {
        if second.chars().count() <= 80 {
            summary.push(' ');
            summary.push_str(second);
        }
    }
    truncate_on_word_boundary(&summary, max_chars)
}

/// A summary too thin to publish: under 60 characters or under 6 tokens.
pub fn is_weak_summary(summary: &str) -> bool {
    summary.chars().count() < 60 || summary.split_whitespace().count() < 6
}

/// Pick the most information-dense sentence from the original text as a
/// fallback for weak oracle summaries. Scores numbers, capitalized name
/// pairs, acronyms, and @/# mentions; earlier sentences win ties.
pub fn lead_sentence(text: &str) -> Option<String> {
    let sentences = split_sentences(text);
    let mut best: Option<(i32, String)> = None;
    for sentence in sentences {
        let score = sentence_score(&sentence);
        match &best {
            Some((top, _)) if score <= *top => {}
            _ => best = Some((score, sentence)),
        }
    }
    best.map(|(_, s)| s)
}

fn sentence_score(sentence: &str) -> i32 {
    let tokens: Vec<&str> = sentence.split_whitespace().collect();
    let mut score = 0i32;
    let mut prev_capitalized = false;
    for (i, tok) in tokens.iter().enumerate() {
        let bare = tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '#');
        if bare.chars().any(|c| c.is_ascii_digit()) {
            score += 2;
        }
        if bare.starts_with('@') || bare.starts_with('#') {
            score += 1;
        }
        let first_upper = bare.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
        let capitalized = i > 0 && first_upper;
        if capitalized && prev_capitalized {
            score += 3;
        }
        if bare.len() >= 2 && bare.len() <= 5 && bare.chars().all(|c| c.is_uppercase()) {
            score += 2;
        }
        prev_capitalized = capitalized;
    }
    score
}

// --- Unique-info heuristic ---

/// English calendar words matched exactly (lowercased).
const CALENDAR_EN: [&str; 22] = [
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday", "today",
    "yesterday", "tomorrow",
];

/// Russian/Ukrainian calendar stems matched by prefix to cover declensions.
const CALENDAR_STEMS: [&str; 25] = [
    "январ", "феврал", "март", "апрел", "мая", "июн", "июл", "август",
    "сентябр", "октябр", "ноябр", "декабр", "понедельник", "вторник",
    "сред", "четверг", "пятниц", "суббот", "воскресень", "сегодня", "вчера",
    "завтра", "сьогодні", "вчора", "нині",
];

/// Conservative check for concrete information: a proper-noun-like token,
/// a digit, or a calendar/relative-day word. Summaries without any of these
/// read as vague and take an importance penalty.
pub fn has_unique_info(text: &str) -> bool {
    for (i, tok) in text.split_whitespace().enumerate() {
        let bare = tok.trim_matches(|c: char| !c.is_alphanumeric());
        if bare.is_empty() {
            continue;
        }
        if bare.chars().any(|c| c.is_ascii_digit()) {
            return true;
        }
        let lower = bare.to_lowercase();
        if CALENDAR_EN.contains(&lower.as_str())
            || CALENDAR_STEMS.iter().any(|stem| lower.starts_with(stem))
        {
            return true;
        }
        // Proper-noun-like: capitalized token past the sentence start.
        let first_upper = bare.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
        if i > 0 && first_upper && bare.chars().count() >= 2 {
            return true;
        }
    }
    false
}
