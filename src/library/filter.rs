//! Compiled tag expressions for view filtering.
//!
//! An expression is an AND of terms separated by `&`. Each term is
//! `field op value`:
//!
//! ```text
//! artist="boards of canada" & genre~idm & date>=19980000 & duration<600
//! ```
//!
//! Operators: `=` `!=` (case-insensitive equality), `~` (substring),
//! `<` `<=` `>` `>=` (numeric). Values may be double-quoted. Numeric
//! comparisons work on the built-in fields (`duration`, `bitrate`,
//! `play_count`, `bpm`) and on any tag that parses as an integer (`date`,
//! `tracknumber`, ...). A missing tag fails every predicate except `!=`.

use crate::model::TrackInfo;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,

    #[error("invalid term `{0}`")]
    InvalidTerm(String),

    #[error("field `{0}` needs an integer value")]
    IntegerExpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn is_numeric(self) -> bool {
        matches!(self, Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }
}

#[derive(Debug, Clone)]
enum Field {
    Tag(String),
    Filename,
    Duration,
    Bitrate,
    PlayCount,
    Bpm,
}

#[derive(Debug, Clone)]
enum Operand {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone)]
struct Predicate {
    field: Field,
    op: Op,
    operand: Operand,
}

impl Predicate {
    fn int_value(&self, ti: &TrackInfo) -> Option<i64> {
        match &self.field {
            Field::Duration => (ti.duration >= 0).then_some(ti.duration as i64),
            Field::Bitrate => (ti.bitrate >= 0).then_some(ti.bitrate as i64),
            Field::Bpm => (ti.bpm >= 0).then_some(ti.bpm as i64),
            Field::PlayCount => Some(ti.play_count as i64),
            Field::Filename => None,
            Field::Tag(name) => ti.tags.get(name).and_then(|v| {
                v.trim().split(['/', '-']).next().and_then(|n| n.trim().parse().ok())
            }),
        }
    }

    fn str_value<'t>(&self, ti: &'t TrackInfo) -> Option<&'t str> {
        match &self.field {
            Field::Tag(name) => ti.tags.get(name),
            Field::Filename => Some(ti.filename()),
            _ => None,
        }
    }

    fn eval(&self, ti: &TrackInfo) -> bool {
        match &self.operand {
            Operand::Int(wanted) => {
                let Some(value) = self.int_value(ti) else {
                    return self.op == Op::Ne;
                };
                match self.op {
                    Op::Eq => value == *wanted,
                    Op::Ne => value != *wanted,
                    Op::Lt => value < *wanted,
                    Op::Le => value <= *wanted,
                    Op::Gt => value > *wanted,
                    Op::Ge => value >= *wanted,
                    Op::Contains => false,
                }
            }
            Operand::Str(wanted) => {
                let Some(value) = self.str_value(ti) else {
                    return self.op == Op::Ne;
                };
                let value = value.to_lowercase();
                match self.op {
                    Op::Eq => value == *wanted,
                    Op::Ne => value != *wanted,
                    Op::Contains => value.contains(wanted.as_str()),
                    _ => false,
                }
            }
        }
    }
}

/// A compiled filter: the conjunction of its predicates.
#[derive(Debug, Clone)]
pub struct TagFilter {
    predicates: Vec<Predicate>,
    source: String,
}

impl TagFilter {
    /// Compile an expression.
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(FilterError::Empty);
        }
        let predicates = expr
            .split('&')
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            predicates,
            source: expr.to_string(),
        })
    }

    /// The expression this filter was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when every predicate accepts the track.
    pub fn accepts(&self, ti: &TrackInfo) -> bool {
        self.predicates.iter().all(|p| p.eval(ti))
    }
}

const OPS: &[(&str, Op)] = &[
    ("!=", Op::Ne),
    ("<=", Op::Le),
    (">=", Op::Ge),
    ("=", Op::Eq),
    ("~", Op::Contains),
    ("<", Op::Lt),
    (">", Op::Gt),
];

fn parse_term(term: &str) -> Result<Predicate, FilterError> {
    let term = term.trim();
    let (at, op_str, op) = OPS
        .iter()
        .filter_map(|(s, op)| term.find(s).map(|at| (at, *s, *op)))
        .min_by_key(|(at, s, _)| (*at, std::cmp::Reverse(s.len())))
        .ok_or_else(|| FilterError::InvalidTerm(term.to_string()))?;

    let field_name = term[..at].trim().to_lowercase();
    if field_name.is_empty() {
        return Err(FilterError::InvalidTerm(term.to_string()));
    }
    let raw = term[at + op_str.len()..].trim();
    let raw = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(raw);

    let field = match field_name.as_str() {
        "filename" => Field::Filename,
        "duration" => Field::Duration,
        "bitrate" => Field::Bitrate,
        "play_count" => Field::PlayCount,
        "bpm" => Field::Bpm,
        _ => Field::Tag(field_name.clone()),
    };

    let numeric_builtin = matches!(
        field,
        Field::Duration | Field::Bitrate | Field::PlayCount | Field::Bpm
    );
    let operand = if op.is_numeric() || numeric_builtin {
        Operand::Int(
            raw.parse()
                .map_err(|_| FilterError::IntegerExpected(field_name))?,
        )
    } else {
        Operand::Str(raw.to_lowercase())
    };

    Ok(Predicate { field, op, operand })
}
