//! Text → [`Value`] reader for a single frame body.

use std::iter::Peekable;
use std::str::Chars;

use super::symbol::{intern_within, package_within, Package, MAX_PACKAGES, MAX_SYMBOLS};
use super::value::Value;
use crate::error::ProtocolError;

pub(crate) fn is_white(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\u{b}' | '\u{c}' | '\r' | ' ')
}

pub(crate) fn is_terminator(c: char) -> bool {
    is_white(c) || matches!(c, '(' | ')' | '"' | ':' | '\0')
}

/// Token text that reads as a number: an optional sign, then
/// `digits ('.' digits*)?` or `'.' digits+`.
pub(crate) fn looks_numeric(token: &str) -> bool {
    let unsigned = token.strip_prefix(['-', '+']).unwrap_or(token);
    let mut dots = 0;
    let mut digits = 0;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedFrame(reason.into())
}

fn symbol(package: Package, name: &str) -> Result<Value, ProtocolError> {
    intern_within(package, name, MAX_SYMBOLS)
        .map(Value::Symbol)
        .ok_or_else(|| malformed(format!("too many distinct symbols to intern {}", name)))
}

impl Reader<'_> {
    fn skip_white(&mut self) {
        while self.chars.next_if(|c| is_white(*c)).is_some() {}
    }

    fn expr(&mut self) -> Result<Value, ProtocolError> {
        self.skip_white();
        match self.chars.peek().copied() {
            None => Err(malformed("unexpected end of frame")),
            Some('(') => {
                self.chars.next();
                self.list()
            }
            Some(')') => Err(malformed("unbalanced ')'")),
            Some('"') => {
                self.chars.next();
                self.string().map(Value::String)
            }
            Some(':') => {
                self.chars.next();
                let (name, _) = self.name()?;
                symbol(Package::Keyword, &name)
            }
            Some('#') => {
                self.chars.next();
                if self.chars.next() != Some(':') {
                    return Err(malformed("expected ':' after '#'"));
                }
                let (name, _) = self.name()?;
                symbol(Package::Uninterned, &name)
            }
            Some(_) => self.token(),
        }
    }

    fn list(&mut self) -> Result<Value, ProtocolError> {
        let mut items = Vec::new();
        loop {
            self.skip_white();
            match self.chars.peek() {
                None => return Err(malformed("unterminated list")),
                Some(')') => {
                    self.chars.next();
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.expr()?),
            }
        }
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(malformed("unterminated string")),
                Some('\\') => match self.chars.next() {
                    Some(c) => out.push(c),
                    None => return Err(malformed("dangling escape in string")),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    /// Read a name up to the next terminator. Returns whether any character
    /// was escaped, since escaped tokens never read as numbers.
    fn name(&mut self) -> Result<(String, bool), ProtocolError> {
        let mut out = String::new();
        let mut escaped = false;
        while let Some(&c) = self.chars.peek() {
            if is_terminator(c) {
                break;
            }
            self.chars.next();
            if c == '\\' {
                match self.chars.next() {
                    Some(e) => out.push(e),
                    None => return Err(malformed("dangling escape in symbol")),
                }
                escaped = true;
            } else {
                out.push(c);
            }
        }
        if out.is_empty() {
            return Err(malformed("empty symbol name"));
        }
        Ok((out, escaped))
    }

    fn token(&mut self) -> Result<Value, ProtocolError> {
        let (token, escaped) = self.name()?;
        if self.chars.peek() == Some(&':') {
            self.chars.next();
            let (name, _) = self.name()?;
            let package = package_within(&token, MAX_PACKAGES)
                .ok_or_else(|| malformed(format!("too many packages to intern {}", token)))?;
            return symbol(package, &name);
        }
        if !escaped && looks_numeric(&token) {
            return number(&token);
        }
        symbol(Package::Lichat, &token)
    }
}

fn number(token: &str) -> Result<Value, ProtocolError> {
    if token.contains('.') {
        let (sign, digits) = match token.strip_prefix(['-', '+']) {
            Some(rest) => (&token[..1], rest),
            None => ("", token),
        };
        let zero = if digits.starts_with('.') { "0" } else { "" };
        format!("{}{}{}", sign, zero, digits)
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| malformed(format!("bad number {}: {}", token, e)))
    } else {
        token
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| malformed(format!("bad number {}: {}", token, e)))
    }
}

/// Read exactly one expression from `src`; trailing whitespace is allowed.
pub fn read_value(src: &str) -> Result<Value, ProtocolError> {
    let mut reader = Reader {
        chars: src.chars().peekable(),
    };
    let value = reader.expr()?;
    reader.skip_white();
    if reader.chars.peek().is_some() {
        return Err(malformed("trailing data after expression"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::symbol::{kw, li, package};

    #[test]
    fn reads_atoms() {
        assert_eq!(read_value("\"hi\"").unwrap(), Value::from("hi"));
        assert_eq!(read_value("42").unwrap(), Value::Integer(42));
        assert_eq!(read_value("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(read_value(".5").unwrap(), Value::Float(0.5));
        assert_eq!(read_value("-7").unwrap(), Value::Integer(-7));
        assert_eq!(read_value("-.25").unwrap(), Value::Float(-0.25));
        assert_eq!(read_value("-").unwrap(), Value::Symbol(li("-")));
        assert_eq!(read_value(":topic").unwrap(), Value::Symbol(kw("topic")));
        assert_eq!(read_value("message").unwrap(), Value::Symbol(li("message")));
    }

    #[test]
    fn reads_escapes() {
        assert_eq!(
            read_value(r#""a \"quoted\" \\ word""#).unwrap(),
            Value::from(r#"a "quoted" \ word"#)
        );
        // An escaped digit keeps a token from reading as a number.
        assert_eq!(read_value(r"\123").unwrap(), Value::Symbol(li("123")));
    }

    #[test]
    fn reads_nested_lists() {
        let value = read_value("(join (:a \"b\") ())").unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Symbol(li("join")),
                Value::List(vec![Value::Symbol(kw("a")), Value::from("b")]),
                Value::List(vec![]),
            ])
        );
    }

    #[test]
    fn reads_qualified_symbols() {
        let value = read_value("shirakumo:emote").unwrap();
        let sym = value.as_symbol().unwrap();
        assert_eq!(sym.name(), "emote");
        assert_eq!(sym.package(), package("shirakumo"));
        let value = read_value("#:gensym").unwrap();
        assert_eq!(value.as_symbol().unwrap().package(), Package::Uninterned);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(read_value("(message :text \"oops").is_err());
        assert!(read_value("(message").is_err());
        assert!(read_value(")").is_err());
        assert!(read_value("(a) (b)").is_err());
        assert!(read_value("").is_err());
    }
}
