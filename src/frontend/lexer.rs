use crate::diagnostics::{Diagnostics, SourceLoc, Stage};
use crate::frontend::token::Token;

/// A token paired with the location where it started.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub loc: SourceLoc,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.line, self.col)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Skip a `/# ... #/` block comment. The opening `/#` has already been
    /// recognized via peek. An unterminated comment runs to end of input.
    fn skip_block_comment(&mut self) {
        self.advance(); // '/'
        self.advance(); // '#'
        while let Some(ch) = self.current() {
            if ch == '#' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn read_escape(&mut self) -> char {
        // Caller consumed the backslash; current() is the escape character.
        let decoded = match self.current() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some('0') => '\0',
            Some(other) => other,
            None => '\0',
        };
        self.advance();
        decoded
    }

    fn read_string(&mut self, diags: &mut Diagnostics) -> Token {
        let start = self.loc();
        self.advance(); // opening quote

        let mut text = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Token::Str(text);
                }
                Some('\\') => {
                    self.advance();
                    text.push(self.read_escape());
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
                None => {
                    diags.error(Stage::Lexer, start, "unterminated string literal");
                    return Token::Str(text);
                }
            }
        }
    }

    fn read_char(&mut self, diags: &mut Diagnostics) -> Token {
        let start = self.loc();
        self.advance(); // opening quote

        let ch = match self.current() {
            Some('\\') => {
                self.advance();
                self.read_escape()
            }
            Some('\'') => {
                diags.error(Stage::Lexer, start, "empty character literal");
                self.advance();
                return Token::Char(0);
            }
            Some(c) => {
                self.advance();
                c
            }
            None => {
                diags.error(Stage::Lexer, start, "unterminated character literal");
                return Token::Char(0);
            }
        };

        if self.current() == Some('\'') {
            self.advance();
        } else {
            diags.error(Stage::Lexer, start, "unterminated character literal");
        }
        Token::Char(ch as u8)
    }

    fn read_number(&mut self) -> Token {
        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                // Only a decimal point when followed by a digit.
                if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    has_dot = true;
                    digits.push('.');
                    self.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        if has_dot {
            Token::Float(digits.parse().unwrap_or(0.0))
        } else {
            Token::Int(digits.parse().unwrap_or(0))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "Let" => Token::Let,
            "func" => Token::Func,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "while" => Token::While,
            "Import" => Token::Import,
            "true" => Token::True,
            "false" => Token::False,
            "break" => Token::Break,
            "continue" => Token::Continue,
            _ => Token::Ident(ident),
        }
    }

    fn read_operator(&mut self, diags: &mut Diagnostics) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let token = match (ch, next) {
            ('=', Some('=')) => {
                self.advance();
                self.advance();
                Token::EqualEqual
            }
            ('!', Some('=')) => {
                self.advance();
                self.advance();
                Token::BangEqual
            }
            ('<', Some('=')) => {
                self.advance();
                self.advance();
                Token::LessEqual
            }
            ('>', Some('=')) => {
                self.advance();
                self.advance();
                Token::GreaterEqual
            }
            ('&', Some('&')) => {
                self.advance();
                self.advance();
                Token::AndAnd
            }
            ('|', Some('|')) => {
                self.advance();
                self.advance();
                Token::OrOr
            }
            ('&', _) | ('|', _) => {
                let loc = self.loc();
                diags.error(
                    Stage::Lexer,
                    loc,
                    format!("unexpected character: '{}'", ch),
                );
                self.advance();
                return None;
            }
            ('+', _) => {
                self.advance();
                Token::Plus
            }
            ('-', _) => {
                self.advance();
                Token::Minus
            }
            ('*', _) => {
                self.advance();
                Token::Star
            }
            ('/', _) => {
                self.advance();
                Token::Slash
            }
            ('%', _) => {
                self.advance();
                Token::Percent
            }
            ('=', _) => {
                self.advance();
                Token::Equal
            }
            ('!', _) => {
                self.advance();
                Token::Bang
            }
            ('<', _) => {
                self.advance();
                Token::Less
            }
            ('>', _) => {
                self.advance();
                Token::Greater
            }
            (':', _) => {
                self.advance();
                Token::Colon
            }
            (';', _) => {
                self.advance();
                Token::Semicolon
            }
            ('.', _) => {
                self.advance();
                Token::Dot
            }
            (',', _) => {
                self.advance();
                Token::Comma
            }
            ('(', _) => {
                self.advance();
                Token::LParen
            }
            (')', _) => {
                self.advance();
                Token::RParen
            }
            ('{', _) => {
                self.advance();
                Token::LBrace
            }
            ('}', _) => {
                self.advance();
                Token::RBrace
            }
            ('[', _) => {
                self.advance();
                Token::LBracket
            }
            (']', _) => {
                self.advance();
                Token::RBracket
            }
            _ => return None,
        };

        Some(token)
    }

    /// Tokenize the whole input. Bad input produces diagnostics and the
    /// lexer advances past it; the stream always ends with `Eof`.
    pub fn tokenize(&mut self, diags: &mut Diagnostics) -> Vec<Spanned> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.current() == Some('/') && self.peek() == Some('#') {
                self.skip_block_comment();
                continue;
            }

            let loc = self.loc();

            match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        loc,
                    });
                    break;
                }
                Some('\n') => {
                    tokens.push(Spanned {
                        token: Token::Newline,
                        loc,
                    });
                    self.advance();
                }
                Some('"') => {
                    let token = self.read_string(diags);
                    tokens.push(Spanned { token, loc });
                }
                Some('\'') => {
                    let token = self.read_char(diags);
                    tokens.push(Spanned { token, loc });
                }
                Some(ch) if ch.is_ascii_digit() => {
                    let token = self.read_number();
                    tokens.push(Spanned { token, loc });
                }
                Some(ch) if ch.is_alphabetic() || ch == '_' => {
                    let token = self.read_identifier();
                    tokens.push(Spanned { token, loc });
                }
                Some(ch) => {
                    if let Some(token) = self.read_operator(diags) {
                        tokens.push(Spanned { token, loc });
                    } else if self.current() == Some(ch) {
                        diags.error(
                            Stage::Lexer,
                            loc,
                            format!("unexpected character: '{}'", ch),
                        );
                        self.advance();
                    }
                }
            }
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut diags = Diagnostics::new();
        let mut lexer = Lexer::new(source);
        let out: Vec<Token> = lexer
            .tokenize(&mut diags)
            .into_iter()
            .map(|s| s.token)
            .filter(|t| !matches!(t, Token::Newline | Token::Eof))
            .collect();
        assert!(!diags.has_errors(), "unexpected lexer errors");
        out
    }

    fn tokens_raw(source: &str) -> (Vec<Spanned>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut lexer = Lexer::new(source);
        let out = lexer.tokenize(&mut diags);
        (out, diags)
    }

    #[test]
    fn test_keywords_and_idents() {
        let t = tokens("Let func return if else for while Import true false break continue foo");
        assert_eq!(
            t,
            vec![
                Token::Let,
                Token::Func,
                Token::Return,
                Token::If,
                Token::Else,
                Token::For,
                Token::While,
                Token::Import,
                Token::True,
                Token::False,
                Token::Break,
                Token::Continue,
                Token::Ident("foo".to_string()),
            ]
        );
    }

    #[test]
    fn test_keyword_vs_ident_boundary() {
        let t = tokens("iff letx whiley");
        assert_eq!(
            t,
            vec![
                Token::Ident("iff".to_string()),
                Token::Ident("letx".to_string()),
                Token::Ident("whiley".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let t = tokens("0 42 3.14 10.0");
        assert_eq!(
            t,
            vec![
                Token::Int(0),
                Token::Int(42),
                Token::Float(3.14),
                Token::Float(10.0),
            ]
        );
    }

    #[test]
    fn test_dot_not_part_of_number() {
        // '.' only starts a fraction when followed by a digit
        let t = tokens("1.foo");
        assert_eq!(
            t,
            vec![
                Token::Int(1),
                Token::Dot,
                Token::Ident("foo".to_string()),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let t = tokens("+ - * / % = == != < <= > >= && || !");
        assert_eq!(
            t,
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::Equal,
                Token::EqualEqual,
                Token::BangEqual,
                Token::Less,
                Token::LessEqual,
                Token::Greater,
                Token::GreaterEqual,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn test_punctuation_and_delimiters() {
        let t = tokens(": ; . , ( ) { } [ ]");
        assert_eq!(
            t,
            vec![
                Token::Colon,
                Token::Semicolon,
                Token::Dot,
                Token::Comma,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let t = tokens(r#""a\nb\tc\r\\\"\'\0""#);
        assert_eq!(t, vec![Token::Str("a\nb\tc\r\\\"'\0".to_string())]);
    }

    #[test]
    fn test_unknown_escape_kept_verbatim() {
        let t = tokens(r#""\q""#);
        assert_eq!(t, vec![Token::Str("q".to_string())]);
    }

    #[test]
    fn test_char_literals() {
        let t = tokens(r"'a' '\n' '\''");
        assert_eq!(
            t,
            vec![Token::Char(b'a'), Token::Char(b'\n'), Token::Char(b'\'')]
        );
    }

    #[test]
    fn test_block_comment_skipped() {
        let t = tokens("1 /# anything\n at all #/ 2");
        assert_eq!(t, vec![Token::Int(1), Token::Int(2)]);
    }

    #[test]
    fn test_unterminated_comment_runs_to_eof() {
        let (spanned, diags) = tokens_raw("1 /# never closed");
        assert!(!diags.has_errors());
        let toks: Vec<&Token> = spanned.iter().map(|s| &s.token).collect();
        assert_eq!(toks, vec![&Token::Int(1), &Token::Eof]);
    }

    #[test]
    fn test_unterminated_string_reports_and_continues() {
        let (spanned, diags) = tokens_raw("\"abc");
        assert!(diags.has_errors());
        assert!(matches!(spanned[0].token, Token::Str(ref s) if s == "abc"));
        assert!(matches!(spanned.last().unwrap().token, Token::Eof));
    }

    #[test]
    fn test_unexpected_character_reports_and_advances() {
        let (spanned, diags) = tokens_raw("1 @ 2");
        assert!(diags.has_errors());
        let toks: Vec<&Token> = spanned.iter().map(|s| &s.token).collect();
        assert_eq!(toks, vec![&Token::Int(1), &Token::Int(2), &Token::Eof]);
    }

    #[test]
    fn test_newlines_are_tokens() {
        let (spanned, _) = tokens_raw("1\n2\n");
        let toks: Vec<&Token> = spanned.iter().map(|s| &s.token).collect();
        assert_eq!(
            toks,
            vec![
                &Token::Int(1),
                &Token::Newline,
                &Token::Int(2),
                &Token::Newline,
                &Token::Eof
            ]
        );
    }

    #[test]
    fn test_spans() {
        let (sp, _) = tokens_raw("Let x = 10\nx");

        assert_eq!(sp[0].loc, SourceLoc::new(1, 1)); // Let
        assert_eq!(sp[1].loc, SourceLoc::new(1, 5)); // x
        assert_eq!(sp[2].loc, SourceLoc::new(1, 7)); // =
        assert_eq!(sp[3].loc, SourceLoc::new(1, 9)); // 10
        assert_eq!(sp[4].loc, SourceLoc::new(1, 11)); // newline
        assert_eq!(sp[5].loc, SourceLoc::new(2, 1)); // x
    }

    #[test]
    fn test_declaration_shapes() {
        let t = tokens("Let x : Int = 42;");
        assert_eq!(
            t,
            vec![
                Token::Let,
                Token::Ident("x".to_string()),
                Token::Colon,
                Token::Ident("Int".to_string()),
                Token::Equal,
                Token::Int(42),
                Token::Semicolon,
            ]
        );

        let t = tokens("int y = 1");
        assert_eq!(
            t,
            vec![
                Token::Ident("int".to_string()),
                Token::Ident("y".to_string()),
                Token::Equal,
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn test_printf_colon_form() {
        let t = tokens(r#"printf("%d": 1)"#);
        assert_eq!(
            t,
            vec![
                Token::Ident("printf".to_string()),
                Token::LParen,
                Token::Str("%d".to_string()),
                Token::Colon,
                Token::Int(1),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_import_angle_form() {
        let t = tokens("Import <Core.sxh>");
        assert_eq!(
            t,
            vec![
                Token::Import,
                Token::Less,
                Token::Ident("Core".to_string()),
                Token::Dot,
                Token::Ident("sxh".to_string()),
                Token::Greater,
            ]
        );
    }
}
