//! Small utility helpers used across modules.

/// Normalize a typed answer for comparison: trimmed and lowercased.
pub fn normalize_answer(s: &str) -> String {
  s.trim().to_lowercase()
}

/// Sentence with runs of whitespace collapsed to single spaces and trimmed.
/// This is the form a correctly arranged word list joins back into.
pub fn canonical_sentence(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Log-safe truncation for user-supplied strings.
/// Cuts on a char boundary so multi-byte text never panics.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) { cut -= 1; }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonical_sentence_collapses_spacing() {
    assert_eq!(canonical_sentence("  Je  suis\tici "), "Je suis ici");
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    assert_eq!(trunc_for_log("court", 10), "court");
    assert_eq!(trunc_for_log("été", 2), "é… (5 bytes total)");
  }
}
