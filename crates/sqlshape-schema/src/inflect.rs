//! Singular/plural table-name rules.
//!
//! Role rules and table lookups accept either spelling, so both forms are
//! computed here. The rules cover regular English nouns; schemas with
//! irregular table names should register the exact name they query by.

/// "user" -> "users", "story" -> "stories", "tax" -> "taxes".
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = strip_consonant_y(&lower) {
        return format!("{stem}ies");
    }
    if lower.ends_with('s') {
        // already plural-looking, leave it alone
        return lower;
    }
    if ends_with_sibilant(&lower) {
        return format!("{lower}es");
    }
    format!("{lower}s")
}

/// "users" -> "user", "stories" -> "story", "taxes" -> "tax".
pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = lower.strip_suffix("es") {
        if ends_with_sibilant(stem) {
            return stem.to_string();
        }
    }
    if let Some(stem) = lower.strip_suffix('s') {
        if !stem.is_empty() && !stem.ends_with('s') {
            return stem.to_string();
        }
    }
    lower
}

fn ends_with_sibilant(word: &str) -> bool {
    word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
}

fn strip_consonant_y(word: &str) -> Option<&str> {
    let stem = word.strip_suffix('y')?;
    let last = stem.chars().last()?;
    if matches!(last, 'a' | 'e' | 'i' | 'o' | 'u') {
        None
    } else {
        Some(stem)
    }
}
