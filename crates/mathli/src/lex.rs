//! Splits a document into indexable slices: prose words and `[imath]`
//! math segments.

const MATH_OPEN: &str = "[imath]";
const MATH_CLOSE: &str = "[/imath]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slice<'a> {
    /// A prose word, lowercased for recall.
    Word(String),
    /// The TeX source between math tags.
    Math(&'a str),
}

pub struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Lexer<'a> {
        Lexer { rest: text }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Slice<'a>;

    fn next(&mut self) -> Option<Slice<'a>> {
        loop {
            if self.rest.is_empty() {
                return None;
            }

            if let Some(after_open) = self.rest.strip_prefix(MATH_OPEN) {
                let (tex, rest) = match after_open.find(MATH_CLOSE) {
                    Some(end) => (&after_open[..end], &after_open[end + MATH_CLOSE.len()..]),
                    // unterminated tag: take the remainder as math
                    None => (after_open, ""),
                };
                self.rest = rest;
                return Some(Slice::Math(tex));
            }

            let mut chars = self.rest.char_indices();
            let (_, c) = chars.next().expect("rest is non-empty");
            if is_word_char(c) {
                let end = self
                    .rest
                    .char_indices()
                    .find(|&(_, c)| !is_word_char(c))
                    .map(|(i, _)| i)
                    .unwrap_or(self.rest.len());
                let word = self.rest[..end].to_lowercase();
                self.rest = &self.rest[end..];
                return Some(Slice::Word(word));
            }

            // separator: skip one char and retry
            self.rest = chars.as_str();
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Slice<'_>> {
        Lexer::new(text).collect()
    }

    #[test]
    fn words_and_math_interleave() {
        let slices = lex("The sum [imath]a+b[/imath] converges.");
        assert_eq!(
            slices,
            vec![
                Slice::Word("the".to_string()),
                Slice::Word("sum".to_string()),
                Slice::Math("a+b"),
                Slice::Word("converges".to_string()),
            ]
        );
    }

    #[test]
    fn words_are_lowercased() {
        assert_eq!(lex("Cauchy"), vec![Slice::Word("cauchy".to_string())]);
    }

    #[test]
    fn unterminated_math_takes_the_rest() {
        assert_eq!(lex("see [imath]x+1"), vec![
            Slice::Word("see".to_string()),
            Slice::Math("x+1"),
        ]);
    }

    #[test]
    fn adjacent_math_segments() {
        let slices = lex("[imath]a[/imath][imath]b[/imath]");
        assert_eq!(slices, vec![Slice::Math("a"), Slice::Math("b")]);
    }

    #[test]
    fn underscores_stay_inside_words() {
        assert_eq!(lex("math_exp"), vec![Slice::Word("math_exp".to_string())]);
    }
}
