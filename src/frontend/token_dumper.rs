use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints a nicer value for some tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        for s in tokens {
            self.print_one(s);
        }
    }

    fn print_one(&self, s: &Spanned) {
        let line = s.loc.line;
        let col = s.loc.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            println!(
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                line, col, colr, kind, s.token, reset
            );
        } else {
            match &s.token {
                Token::Newline => {
                    println!("[{:02}:{:02}] {}{:<8}{}", line, col, colr, kind, reset);
                }
                other => {
                    println!(
                        "[{:02}:{:02}] {}{:<8} {}{}",
                        line, col, colr, kind, other, reset
                    );
                }
            }
        }
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline => "NEWLINE",
            Eof => "EOF",

            // literals
            Int(_) => "INT",
            Float(_) => "FLOAT",
            Str(_) => "STRING",
            Char(_) => "CHAR",
            True | False => "BOOL",

            // names
            Ident(_) => "IDENT",

            // structure
            LParen | RParen => "PAREN",
            LBrace | RBrace => "BRACE",
            LBracket | RBracket => "BRACKET",
            Colon | Semicolon | Dot | Comma => "PUNCT",

            // ops / comparisons
            Plus | Minus | Star | Slash | Percent | Bang => "OP",
            Equal | EqualEqual | BangEqual | Less | LessEqual | Greater | GreaterEqual => "CMP",
            AndAnd | OrOr => "LOGIC",

            // everything else = keyword
            _ => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline | Eof => Self::DIM,
            Str(_) | Char(_) => Self::GRN,
            Int(_) | Float(_) | True | False => Self::CYN,
            Ident(_) => Self::YEL,
            Plus | Minus | Star | Slash | Percent | Bang => Self::MAG,
            Equal | EqualEqual | BangEqual | Less | LessEqual | Greater | GreaterEqual => Self::MAG,
            AndAnd | OrOr => Self::MAG,
            _ => Self::RESET,
        }
    }
}
