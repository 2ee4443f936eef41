//! Reply segmentation.
//!
//! A reply is cut into [`SpeakableUnit`]s in three passes:
//!
//! 1. Sentences: split after each run of `.` `!` `?` `。` `！` `？` or newline;
//!    the run stays with the sentence it ends.
//! 2. Clauses: a sentence longer than the limit is split after commas
//!    (`,` `，` `、`) and the pieces are packed back together greedily.
//! 3. Words: a clause still over the limit is word-wrapped.  A single word
//!    longer than the limit becomes its own unit.
//!
//! A piece with no letters or digits is never emitted on its own; it is glued
//! to the previous unit (or to the next one when nothing precedes it).
//! Joining the units with single spaces gives back the input up to the
//! whitespace at cut points.

/// One piece of a reply, in reply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableUnit {
    pub sequence_index: usize,
    pub text: String,
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n')
}

fn is_clause_break(c: char) -> bool {
    matches!(c, ',' | '，' | '、')
}

fn is_speakable(s: &str) -> bool {
    s.chars().any(char::is_alphanumeric)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    max_unit_chars: usize,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(200)
    }
}

impl SentenceSegmenter {
    /// `max_unit_chars` is clamped to at least 1.
    pub fn new(max_unit_chars: usize) -> Self {
        Self {
            max_unit_chars: max_unit_chars.max(1),
        }
    }

    pub fn max_unit_chars(&self) -> usize {
        self.max_unit_chars
    }

    pub fn segment(&self, text: &str) -> Vec<SpeakableUnit> {
        let pieces: Vec<String> = split_after(text, is_terminator)
            .into_iter()
            .flat_map(|sentence| self.subdivide(sentence))
            .collect();

        absorb_unspeakable(pieces)
            .into_iter()
            .enumerate()
            .map(|(sequence_index, text)| SpeakableUnit {
                sequence_index,
                text,
            })
            .collect()
    }

    fn subdivide(&self, sentence: String) -> Vec<String> {
        let max = self.max_unit_chars;
        if char_len(&sentence) <= max {
            return vec![sentence];
        }

        let mut out = Vec::new();
        for clause in pack(split_after(&sentence, is_clause_break), max) {
            if char_len(&clause) <= max {
                out.push(clause);
            } else {
                out.extend(pack(
                    clause.split_whitespace().map(str::to_string).collect(),
                    max,
                ));
            }
        }
        out
    }
}

/// Cut `text` after every run of `is_break` characters.  Pieces are trimmed;
/// pieces without speakable content are merged into a neighbour.
fn split_after(text: &str, is_break: fn(char) -> bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if is_break(c) {
            while let Some(&next) = chars.peek() {
                if !is_break(next) {
                    break;
                }
                current.push(next);
                chars.next();
            }
            let piece = current.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    absorb_unspeakable(pieces)
}

/// Glue punctuation-only pieces onto the previous piece, or onto the next one
/// when they lead.  If nothing is speakable the result is empty.
fn absorb_unspeakable(pieces: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(pieces.len());
    let mut leading = String::new();

    for piece in pieces {
        if is_speakable(&piece) {
            if leading.is_empty() {
                out.push(piece);
            } else {
                out.push(format!("{} {piece}", std::mem::take(&mut leading)));
            }
        } else if let Some(last) = out.last_mut() {
            last.push_str(&piece);
        } else {
            if !leading.is_empty() {
                leading.push(' ');
            }
            leading.push_str(&piece);
        }
    }
    out
}

/// Greedily join consecutive pieces with a space while they fit in `max`.
/// A piece that is already too long passes through alone.
fn pack(pieces: Vec<String>, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if current.is_empty() {
            current = piece;
        } else if char_len(&current) + 1 + char_len(&piece) <= max {
            current.push(' ');
            current.push_str(&piece);
        } else {
            out.push(std::mem::replace(&mut current, piece));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[SpeakableUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn two_sentences() {
        let units = SentenceSegmenter::default().segment("Hi there! How can I help?");
        assert_eq!(texts(&units), vec!["Hi there!", "How can I help?"]);
        assert_eq!(units[0].sequence_index, 0);
        assert_eq!(units[1].sequence_index, 1);
    }

    #[test]
    fn terminator_runs_stay_together() {
        let units = SentenceSegmenter::default().segment("Wait... really?! Yes.");
        assert_eq!(texts(&units), vec!["Wait...", "really?!", "Yes."]);
    }

    #[test]
    fn full_width_and_newlines() {
        let units = SentenceSegmenter::default().segment("こんにちは。元気ですか？\nはい");
        assert_eq!(texts(&units), vec!["こんにちは。", "元気ですか？", "はい"]);
    }

    #[test]
    fn no_terminator_is_one_unit() {
        let units = SentenceSegmenter::default().segment("  just a fragment  ");
        assert_eq!(texts(&units), vec!["just a fragment"]);
    }

    #[test]
    fn punctuation_only_yields_nothing() {
        let seg = SentenceSegmenter::default();
        assert!(seg.segment("").is_empty());
        assert!(seg.segment("   \n\n ").is_empty());
        assert!(seg.segment("... !? \n 。").is_empty());
    }

    #[test]
    fn stray_punctuation_is_absorbed() {
        let seg = SentenceSegmenter::default();
        assert_eq!(texts(&seg.segment("... Hello.")), vec!["... Hello."]);
        assert_eq!(texts(&seg.segment("Hello. !!")), vec!["Hello.!!"]);
        for unit in seg.segment("?! Yes. . No! ...") {
            assert!(is_speakable(&unit.text), "{:?}", unit.text);
        }
    }

    #[test]
    fn long_sentence_splits_at_commas() {
        let seg = SentenceSegmenter::new(30);
        let text = "First we warm up, then we read a short story, and finally we chat.";
        let units = seg.segment(text);
        assert_eq!(
            texts(&units),
            vec!["First we warm up,", "then we read a short story,", "and finally we chat."]
        );
    }

    #[test]
    fn short_clauses_are_packed() {
        let seg = SentenceSegmenter::new(20);
        let units = seg.segment("One, two, three, four, five, six, seven.");
        assert_eq!(texts(&units), vec!["One, two, three,", "four, five, six,", "seven."]);
    }

    #[test]
    fn word_wrap_fallback_never_splits_words() {
        let seg = SentenceSegmenter::new(12);
        let text = "this sentence has no commas at all but is long";
        let units = seg.segment(text);
        for unit in &units {
            assert!(char_len(&unit.text) <= 12, "{:?}", unit.text);
        }
        let words: Vec<&str> = units.iter().flat_map(|u| u.text.split(' ')).collect();
        assert_eq!(words, text.split(' ').collect::<Vec<_>>());
    }

    #[test]
    fn unsplittable_word_is_allowed_over_limit() {
        let seg = SentenceSegmenter::new(5);
        let units = seg.segment("supercalifragilistic ok");
        assert_eq!(texts(&units), vec!["supercalifragilistic", "ok"]);
    }

    #[test]
    fn bound_holds_except_single_words() {
        let seg = SentenceSegmenter::new(25);
        let text = "Learning a language takes patience, practice, and plenty of conversation. \
                    Pneumonoultramicroscopicsilicovolcanoconiosis is a word! \
                    Short one? Another rather long sentence without any commas whatsoever here.";
        for unit in seg.segment(text) {
            assert!(
                char_len(&unit.text) <= 25 || !unit.text.trim().contains(' '),
                "{:?}",
                unit.text
            );
            assert!(!unit.text.is_empty());
        }
    }

    #[test]
    fn concatenation_round_trips_modulo_whitespace() {
        let seg = SentenceSegmenter::new(18);
        let text = "Bonjour !  Comment allez-vous, mon ami, aujourd'hui ?\nTrès bien, merci beaucoup. Et vous";
        let joined: String = seg.segment(text).iter().map(|u| u.text.as_str()).collect();
        assert_eq!(squash(&joined), squash(text));
    }

    #[test]
    fn indices_are_dense() {
        let seg = SentenceSegmenter::new(10);
        let units = seg.segment("a b c d e f g h i j k l m n o p. q r s!");
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.sequence_index, i);
        }
    }
}
