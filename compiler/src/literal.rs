// literal.rs — Python literal rendering for emitted programs
//
// Small, total renderers for the literal values that appear in generated
// code: keyword-argument lists, quoted name lists, and numeric tables.

use std::fmt;

use crate::error::{Error, Result};
use crate::statement::Statement;

/// A Python literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

impl Literal {
    pub fn str(s: impl Into<String>) -> Self {
        Literal::Str(s.into())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => write!(f, "None"),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => f.write_str(&float(*x)),
            Literal::Str(s) => write!(f, "\"{}\"", escape(s)),
            Literal::List(items) => {
                write!(f, "[")?;
                write_seq(f, items)?;
                write!(f, "]")
            }
            Literal::Tuple(items) => {
                write!(f, "(")?;
                write_seq(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Literal::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Shortest round-trip form that Python reads back as a float.
pub fn float(x: f64) -> String {
    if x.is_nan() {
        "float(\"nan\")".to_string()
    } else if x.is_infinite() {
        if x > 0.0 {
            "float(\"inf\")".to_string()
        } else {
            "-float(\"inf\")".to_string()
        }
    } else {
        format!("{x:?}")
    }
}

impl From<&serde_json::Value> for Literal {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Literal::None,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Literal::Str(s.clone()),
            Value::Array(items) => Literal::List(items.iter().map(Literal::from).collect()),
            Value::Object(map) => Literal::Dict(
                map.iter()
                    .map(|(k, v)| (Literal::Str(k.clone()), Literal::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Render `key=value` keyword arguments. Keys must be strings; string values
/// are quoted, everything else uses its literal form.
pub fn export_dict<'a, I>(entries: I, join: &str, indent: usize) -> Result<Statement>
where
    I: IntoIterator<Item = &'a (Literal, Literal)>,
{
    let sep = format!("{join}{}", " ".repeat(indent));
    let mut parts = Vec::new();
    for (key, value) in entries {
        let Literal::Str(name) = key else {
            return Err(Error::NonStringKey(key.to_string()));
        };
        parts.push(format!("{name}={value}"));
    }
    Ok(Statement::new(parts.join(&sep)))
}

/// Render `var = ["a", "b"]`.
pub fn export_list<S: AsRef<str>>(var: &str, items: &[S], join: &str, indent: usize) -> String {
    let sep = format!("{join}{}", " ".repeat(indent));
    let quoted: Vec<String> = items
        .iter()
        .map(|s| Literal::str(s.as_ref()).to_string())
        .collect();
    format!("{var} = [{}]", quoted.join(&sep))
}
