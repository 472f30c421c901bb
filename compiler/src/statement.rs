// statement.rs — Composable units of emitted program text
//
// A Statement pairs generated text with the imports and preambles it needs.
// Concatenation joins the text and unions the metadata, so emitters can build
// small pieces independently and let the program assembler hoist imports and
// helper definitions ahead of the body exactly once.
//
// Preconditions: none.
// Postconditions: imports/preambles never contain duplicates; preambles keep
//   first-seen order.
// Failure modes: none (emitted text is never validated).
// Side effects: none.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Separator used by `+`.
pub const LINE: &str = "\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub value: String,
    pub imports: Vec<String>,
    pub preambles: Vec<String>,
}

impl Statement {
    pub fn new(value: impl Into<String>) -> Self {
        Statement {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for import in imports {
            push_unique(&mut self.imports, import.into());
        }
        self
    }

    pub fn with_preambles<I, S>(mut self, preambles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for preamble in preambles {
            push_unique(&mut self.preambles, preamble.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.imports.is_empty() && self.preambles.is_empty()
    }

    /// Concatenate with an explicit separator. An empty side contributes no
    /// separator, which keeps `Statement::default()` an identity.
    pub fn join_with(mut self, other: Statement, sep: &str) -> Statement {
        if self.value.is_empty() {
            self.value = other.value;
        } else if !other.value.is_empty() {
            self.value.push_str(sep);
            self.value.push_str(&other.value);
        }
        for import in other.imports {
            push_unique(&mut self.imports, import);
        }
        for preamble in other.preambles {
            push_unique(&mut self.preambles, preamble);
        }
        self
    }

    /// Concatenate a sequence with one separator.
    pub fn join<I>(parts: I, sep: &str) -> Statement
    where
        I: IntoIterator<Item = Statement>,
    {
        parts
            .into_iter()
            .fold(Statement::default(), |acc, s| acc.join_with(s, sep))
    }

    /// Render as a complete program: imports, preambles, then the body.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for import in &self.imports {
            out.push_str(import);
            out.push('\n');
        }
        if !self.imports.is_empty() {
            out.push('\n');
        }
        for preamble in &self.preambles {
            out.push_str(preamble.trim_matches('\n'));
            out.push_str("\n\n");
        }
        out.push_str(&self.value);
        if !self.value.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

impl From<&str> for Statement {
    fn from(value: &str) -> Self {
        Statement::new(value)
    }
}

impl From<String> for Statement {
    fn from(value: String) -> Self {
        Statement::new(value)
    }
}

impl Add for Statement {
    type Output = Statement;

    fn add(self, rhs: Statement) -> Statement {
        self.join_with(rhs, LINE)
    }
}

impl AddAssign for Statement {
    fn add_assign(&mut self, rhs: Statement) {
        let lhs = std::mem::take(self);
        *self = lhs + rhs;
    }
}

impl Sum for Statement {
    fn sum<I: Iterator<Item = Statement>>(iter: I) -> Statement {
        iter.fold(Statement::default(), |acc, s| acc + s)
    }
}

impl FromIterator<Statement> for Statement {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Statement {
        iter.into_iter().sum()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_identity() {
        let s = Statement::new("x = 1").with_imports(["import os"]);
        assert_eq!(Statement::default() + s.clone(), s);
        assert_eq!(s.clone() + Statement::default(), s);
    }

    #[test]
    fn concatenation_joins_lines() {
        let s = Statement::new("a = 1") + Statement::new("b = 2");
        assert_eq!(s.value, "a = 1\nb = 2");
    }

    #[test]
    fn custom_separator() {
        let s = Statement::new("a").join_with(Statement::new("b"), ", ");
        assert_eq!(s.value, "a, b");
    }

    #[test]
    fn imports_are_deduplicated() {
        let piece = Statement::new("g = Grid2D(1.0)").with_imports(["from pyNN.space import Grid2D"]);
        let s: Statement = std::iter::repeat(piece).take(3).collect();
        assert_eq!(s.imports, vec!["from pyNN.space import Grid2D".to_string()]);
        assert_eq!(s.value.lines().count(), 3);
    }

    #[test]
    fn preambles_keep_first_seen_order() {
        let s = Statement::default().with_preambles(["def b(): pass"])
            + Statement::default().with_preambles(["def a(): pass", "def b(): pass"]);
        assert_eq!(s.preambles, vec!["def b(): pass", "def a(): pass"]);
    }

    #[test]
    fn add_assign_accumulates() {
        let mut s = Statement::default();
        s += Statement::new("x");
        s += Statement::new("y");
        assert_eq!(s.to_string(), "x\ny");
    }

    #[test]
    fn render_hoists_imports_and_preambles() {
        let s = Statement::new("main()")
            .with_imports(["import sys"])
            .with_preambles(["\ndef main():\n    pass\n"]);
        assert_eq!(s.render(), "import sys\n\ndef main():\n    pass\n\nmain()\n");
    }
}
