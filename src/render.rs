//! Query text rendering: identifiers and literals.

use std::fmt::Write;

use lazy_static::lazy_static;
use regex::Regex;

use crate::datatype::Value;
use crate::error::{MapperError, Result};

lazy_static! {
    // so regular expressions don't have to be recompiled
    static ref PLAIN_IDENTIFIER: Regex = Regex::new(r"^\w+(?:\[.+\])?$").expect("identifier pattern");
    static ref CALL_OR_QUOTED: Regex = Regex::new(r#"^(?:\w+\(.*\)|".*")$"#).expect("call pattern");
}

/// Emits `name` unquoted when it is a plain word, an indexed word, a function
/// call or already quoted; otherwise wraps it in double quotes.
pub fn identifier(name: &str) -> String {
    if PLAIN_IDENTIFIER.is_match(name) || CALL_OR_QUOTED.is_match(name) {
        name.to_owned()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

pub fn qualified(keyspace: &str, table: &str) -> String {
    format!("{}.{}", identifier(keyspace), identifier(table))
}

pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn literal(value: &Value) -> Result<String> {
    let mut buf = String::new();
    write_literal(&mut buf, value)?;
    Ok(buf)
}

fn write_element(buf: &mut String, value: &Value) -> Result<()> {
    if value.is_null() {
        return Err(MapperError::validation("null elements are not allowed inside a collection"));
    }
    write_literal(buf, value)
}

pub fn write_literal(buf: &mut String, value: &Value) -> Result<()> {
    // writing into a String cannot fail
    let _ = match value {
        Value::Null => write!(buf, "null"),
        Value::Boolean(b) => write!(buf, "{}", b),
        Value::TinyInt(i) => write!(buf, "{}", i),
        Value::SmallInt(i) => write!(buf, "{}", i),
        Value::Int(i) => write!(buf, "{}", i),
        Value::BigInt(i) => write!(buf, "{}", i),
        Value::Float(x) => write_float(buf, f64::from(*x)),
        Value::Double(x) => write_float(buf, *x),
        Value::Decimal(d) => write!(buf, "{}", d),
        Value::Text(s) | Value::Inet(s) => write!(buf, "{}", quote(s)),
        Value::Uuid(u) => write!(buf, "{}", u.hyphenated()),
        Value::Blob(_) => write!(buf, "{}", value),
        Value::Timestamp(t) => write!(buf, "{}", t.timestamp_millis()),
        Value::Date(d) => write!(buf, "'{}'", d),
        Value::List(items) => {
            buf.push('[');
            write_elements(buf, items)?;
            write!(buf, "]")
        }
        Value::Set(items) => {
            buf.push('{');
            write_elements(buf, items)?;
            write!(buf, "}}")
        }
        Value::Map(entries) => {
            buf.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_element(buf, k)?;
                buf.push(':');
                write_element(buf, v)?;
            }
            write!(buf, "}}")
        }
        Value::Udt(fields) => {
            buf.push('{');
            for (i, (name, v)) in fields.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&identifier(name));
                buf.push(':');
                write_literal(buf, v)?;
            }
            write!(buf, "}}")
        }
    };
    Ok(())
}

fn write_elements(buf: &mut String, items: &[Value]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        write_element(buf, item)?;
    }
    Ok(())
}

fn write_float(buf: &mut String, x: f64) -> std::fmt::Result {
    if x.is_nan() {
        write!(buf, "NaN")
    } else if x.is_infinite() {
        write!(buf, "{}", if x > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        write!(buf, "{}", x)
    }
}
