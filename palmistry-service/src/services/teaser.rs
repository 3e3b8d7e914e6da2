//! Short preview of a full reading.

use once_cell::sync::Lazy;
use regex::Regex;

pub const TEASER_MAX_CHARS: usize = 350;

/// Appended to every teaser, whether or not anything was cut.
pub const TEASER_SUFFIX: &str = " …";

/// First two sentences of `full`, capped at [`TEASER_MAX_CHARS`], followed by
/// [`TEASER_SUFFIX`].
pub fn build_teaser(full: &str) -> String {
    let collapsed = full.split_whitespace().collect::<Vec<_>>().join(" ");
    let lead = sentences(&collapsed).take(2).collect::<Vec<_>>().join(" ");

    let mut teaser: String = lead.chars().take(TEASER_MAX_CHARS).collect();
    teaser.truncate(teaser.trim_end().len());
    teaser.push_str(TEASER_SUFFIX);
    teaser
}

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence pattern is valid"));

/// Split text after `.`, `!` or `?` followed by whitespace.
/// The punctuation stays with its sentence.
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut ends = SENTENCE_END.find_iter(text);
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= text.len() {
            return None;
        }
        let sentence = match ends.next() {
            Some(m) => {
                // The punctuation mark is a single byte
                let sentence = &text[start..m.start() + 1];
                start = m.end();
                sentence
            }
            None => {
                let sentence = &text[start..];
                start = text.len();
                sentence
            }
        };
        Some(sentence)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_two_sentences() {
        assert_eq!(
            build_teaser("Sentence one. Sentence two. Sentence three."),
            "Sentence one. Sentence two. …"
        );
    }

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(
            build_teaser("Your palm\n\nis warm!   Lines   run deep?\nThird one."),
            "Your palm is warm! Lines run deep? …"
        );
    }

    // The suffix is added even when nothing was cut off.
    #[test]
    fn short_text_still_gets_ellipsis() {
        assert_eq!(build_teaser("Only one sentence."), "Only one sentence. …");
        assert_eq!(build_teaser("no punctuation at all"), "no punctuation at all …");
    }

    #[test]
    fn punctuation_without_following_space_is_not_a_boundary() {
        assert_eq!(
            build_teaser("Version 2.5 is here. Next. Last."),
            "Version 2.5 is here. Next. …"
        );
    }

    #[test]
    fn long_sentences_are_cut_at_the_character_budget() {
        let long = "a".repeat(500) + ". Second.";
        let teaser = build_teaser(&long);

        assert_eq!(teaser.chars().count(), TEASER_MAX_CHARS + TEASER_SUFFIX.chars().count());
        assert!(teaser.ends_with(" …"));
    }

    #[test]
    fn trailing_space_at_the_cut_is_trimmed() {
        let text = format!("{} bbbb", "a".repeat(349));
        let teaser = build_teaser(&text);
        assert_eq!(teaser, format!("{} …", "a".repeat(349)));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "Линия жизни длинная. ".repeat(40);
        let teaser = build_teaser(&text);
        assert!(teaser.chars().count() <= TEASER_MAX_CHARS + 2);
        assert_eq!(teaser, "Линия жизни длинная. Линия жизни длинная. …");
    }

    #[test]
    fn length_never_exceeds_budget_plus_suffix() {
        let inputs = [
            String::new(),
            "x".repeat(1000),
            "Short. ".repeat(200),
            format!("{}! {}?", "é".repeat(300), "ü".repeat(300)),
        ];
        for input in &inputs {
            let teaser = build_teaser(input);
            assert!(teaser.chars().count() <= 352, "too long: {}", teaser.len());
            assert!(teaser.ends_with(" …"));
        }
    }

    #[test]
    fn sentences_split_on_every_terminator() {
        let parts: Vec<_> = sentences("One. Two! Three? Four").collect();
        assert_eq!(parts, ["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn empty_text_is_just_the_suffix() {
        assert_eq!(build_teaser("   "), " …");
    }
}
