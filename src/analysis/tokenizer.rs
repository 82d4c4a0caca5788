use crate::analysis::token::Token;
use unicode_segmentation::UnicodeSegmentation;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;

    fn clone_box(&self) -> Box<dyn Tokenizer>;
}

/// Splits on every non-alphanumeric character. "Bob-Smith" yields "Bob" and "Smith".
#[derive(Clone, Default)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut start: Option<usize> = None;

        for (offset, c) in text.char_indices() {
            if c.is_alphanumeric() {
                if start.is_none() {
                    start = Some(offset);
                }
            } else if let Some(begin) = start.take() {
                tokens.push(Token::new(text[begin..offset].to_string(), position, begin));
                position += 1;
            }
        }
        if let Some(begin) = start {
            tokens.push(Token::new(text[begin..].to_string(), position, begin));
        }

        tokens
    }

    fn name(&self) -> &str {
        "simple"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(SimpleTokenizer)
    }
}

/// Standard Unicode tokenizer
#[derive(Clone)]
pub struct StandardTokenizer {
    pub max_token_length: usize,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        StandardTokenizer {
            max_token_length: 255,
        }
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for (offset, word) in text.unicode_word_indices() {
            if word.len() <= self.max_token_length {
                tokens.push(Token::new(word.to_string(), position, offset));
                position += 1;
            }
        }

        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn texts(tokens: Vec<Token>) -> Vec<String> {
        tokens.into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_simple_splits_on_punctuation() {
        let tokens = SimpleTokenizer.tokenize("Bob Smith, jr.-42");
        assert_eq!(texts(tokens.clone()), vec!["Bob", "Smith", "jr", "42"]);
        assert_eq!(tokens[1].offset, 4);
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn test_standard_uses_unicode_words() {
        let tokens = StandardTokenizer::default().tokenize("hello, wide world 42");
        assert_eq!(texts(tokens), vec!["hello", "wide", "world", "42"]);
    }

    proptest! {
        #[test]
        fn simple_tokens_are_alphanumeric_slices(text in "\\PC{0,40}") {
            for token in SimpleTokenizer.tokenize(&text) {
                prop_assert!(!token.text.is_empty());
                prop_assert!(token.text.chars().all(char::is_alphanumeric));
                prop_assert_eq!(&text[token.offset..token.offset + token.length], token.text.as_str());
            }
        }
    }
}
