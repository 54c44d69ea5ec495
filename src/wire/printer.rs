//! [`Value`] → text printer; the inverse of the reader.

use std::fmt::Write;

use super::reader::{is_terminator, looks_numeric};
use super::symbol::{Package, Symbol};
use super::value::Value;

fn print_name(name: &str, out: &mut String) {
    // A name that would read back as a number gets its first char escaped.
    if looks_numeric(name) {
        out.push('\\');
    }
    for c in name.chars() {
        if is_terminator(c) || c == '\\' || c == '#' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn print_symbol(symbol: Symbol, out: &mut String) {
    match symbol.package() {
        Package::Keyword => out.push(':'),
        Package::Lichat => {}
        Package::Uninterned => out.push_str("#:"),
        Package::Other(pkg) => {
            print_name(pkg, out);
            out.push(':');
        }
    }
    print_name(symbol.name(), out);
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

pub fn print_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => print_string(s, out),
        Value::Integer(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Float(n) => {
            let text = n.to_string();
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        Value::Symbol(s) => print_symbol(*s, out),
        Value::List(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print_value(item, out);
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::reader::read_value;
    use crate::wire::symbol::{intern, kw, li, package};

    fn printed(value: &Value) -> String {
        let mut out = String::new();
        print_value(value, &mut out);
        out
    }

    #[test]
    fn prints_atoms() {
        assert_eq!(printed(&Value::from("a\"b")), r#""a\"b""#);
        assert_eq!(printed(&Value::Integer(7)), "7");
        assert_eq!(printed(&Value::Float(2.0)), "2.0");
        assert_eq!(printed(&Value::Float(-1.5)), "-1.5");
        assert_eq!(printed(&Value::Symbol(kw("content-type"))), ":content-type");
        assert_eq!(printed(&Value::Symbol(li("no-such-channel"))), "no-such-channel");
    }

    #[test]
    fn escapes_awkward_symbol_names() {
        let awkward = li("has space(and)parens");
        let text = printed(&Value::Symbol(awkward));
        assert_eq!(read_value(&text).unwrap(), Value::Symbol(awkward));

        let numeric = li("2024");
        let text = printed(&Value::Symbol(numeric));
        assert_eq!(text, r"\2024");
        assert_eq!(read_value(&text).unwrap(), Value::Symbol(numeric));
    }

    #[test]
    fn negative_numbers_read_back_as_numbers() {
        for value in [Value::Float(-1.5), Value::Float(-3.0), Value::Integer(-42)] {
            assert_eq!(read_value(&printed(&value)).unwrap(), value);
        }
        let signed = li("-1");
        assert_eq!(read_value(&printed(&Value::Symbol(signed))).unwrap(), Value::Symbol(signed));
    }

    #[test]
    fn prints_lists_and_packages() {
        let value = Value::List(vec![
            Value::Symbol(intern(package("shirakumo"), "emote")),
            Value::List(vec![]),
            Value::from(true),
        ]);
        assert_eq!(printed(&value), "(shirakumo:emote () t)");
    }
}
