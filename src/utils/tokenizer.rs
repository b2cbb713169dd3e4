/// Maximum token length to store in the index.
/// Tokens longer than this are likely base64, hex dumps, or other non-searchable content.
const MAX_TOKEN_LENGTH: usize = 128;

/// A token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lowercased token text
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split SQL text into lowercase word tokens with byte offsets.
///
/// A token is a run of alphanumeric characters or underscores, so SQL
/// identifiers such as `order_items` or `fn_get_user2` stay whole.
/// Punctuation, operators and whitespace separate tokens.
pub fn analyze(content: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(content.len() / 6);
    let mut token_start: Option<usize> = None;

    for (i, ch) in content.char_indices() {
        if is_token_char(ch) {
            if token_start.is_none() {
                token_start = Some(i);
            }
        } else if let Some(start) = token_start.take() {
            push_token(&mut tokens, content, start, i);
        }
    }

    // Handle last token
    if let Some(start) = token_start {
        push_token(&mut tokens, content, start, content.len());
    }

    tokens
}

/// Normalize a single query term the same way indexed tokens are normalized
pub fn normalize_term(term: &str) -> String {
    term.to_lowercase()
}

/// Whether a character can be part of a token
pub fn is_token_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn push_token(tokens: &mut Vec<Token>, content: &str, start: usize, end: usize) {
    let slice = &content[start..end];
    // Only add tokens of meaningful length, skip overly long tokens
    if slice.len() <= MAX_TOKEN_LENGTH {
        tokens.push(Token {
            text: slice.to_lowercase(),
            start,
            end,
        });
    }
}
