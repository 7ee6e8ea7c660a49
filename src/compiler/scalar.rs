//! Scalar expression compilation
//!
//! Turns a SQL expression into a [`ScalarFn`] closure over retrieved rows.
//! Column references are attached to the native tree as a side effect, so the
//! closure only ever captures row indices. Comparison and boolean operators
//! follow SQL's three-valued logic; the single place UNKNOWN collapses to
//! false is the final predicate check in the executor.

use super::{bindings::as_column, QueryBuilder};
use crate::error::{Error, Result};
use crate::functions::{self, date_add, date_diff, date_part, DatePart};
use crate::types::Value;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    UnaryOperator,
};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use super::ScalarFn;

/// Aggregate function names; never valid inside a scalar expression. The
/// projection converter peels top-level aggregates off before this module
/// ever sees them.
pub(crate) fn is_aggregate_name(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX"
    )
}

/// Three-valued truth of an already-evaluated predicate value.
fn tri(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(Error::TypeMismatch {
            expected: "boolean".into(),
            found: format!("{:?}", other),
        }),
    }
}

fn bool_value(truth: Option<bool>) -> Value {
    match truth {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

/// Converts a SQL literal. Whole numbers become integers, decimal literals
/// keep exact precision, exponent notation goes through floats.
pub(crate) fn literal_value(value: &ast::Value) -> Result<Value> {
    match value {
        ast::Value::Number(text, _) => {
            if text.contains(['e', 'E']) {
                text.parse::<f64>()
                    .map(Value::F64)
                    .map_err(|_| Error::InvalidValue(format!("bad numeric literal {}", text)))
            } else if text.contains('.') {
                Decimal::from_str(text)
                    .map(Value::Decimal)
                    .map_err(|_| Error::InvalidValue(format!("bad numeric literal {}", text)))
            } else {
                match text.parse::<i64>() {
                    Ok(n) => Ok(Value::I64(n)),
                    Err(_) => Decimal::from_str(text)
                        .map(Value::Decimal)
                        .map_err(|_| Error::InvalidValue(format!("bad numeric literal {}", text))),
                }
            }
        }
        ast::Value::SingleQuotedString(s) | ast::Value::NationalStringLiteral(s) => {
            Ok(Value::Str(s.clone()))
        }
        ast::Value::HexStringLiteral(s) => hex::decode(s)
            .map(Value::Bytea)
            .map_err(|_| Error::InvalidValue(format!("bad hex literal {}", s))),
        ast::Value::Boolean(b) => Ok(Value::Bool(*b)),
        ast::Value::Null => Ok(Value::Null),
        other => Err(Error::unsupported("literal", other)),
    }
}

/// Translates a LIKE pattern to an anchored, case-insensitive regex.
/// Supports `%`, `_`, bracketed character sets and an optional escape
/// character.
pub(crate) fn like_regex(pattern: &str, escape: Option<char>) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(next) => out.push_str(&regex::escape(&next.to_string())),
                None => {
                    return Err(Error::InvalidValue(format!(
                        "dangling escape in pattern {}",
                        pattern
                    )))
                }
            }
            continue;
        }
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for set_char in chars.by_ref() {
                    if set_char == ']' {
                        closed = true;
                        break;
                    }
                    if set_char == '-' {
                        out.push('-');
                    } else {
                        out.push_str(&regex::escape(&set_char.to_string()));
                    }
                }
                if !closed {
                    return Err(Error::InvalidValue(format!(
                        "unterminated character set in pattern {}",
                        pattern
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    RegexBuilder::new(&out)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::InvalidValue(format!("bad pattern {}: {}", pattern, e)))
}

fn comparison(op: &BinaryOperator) -> Option<fn(Ordering) -> bool> {
    Some(match op {
        BinaryOperator::Eq => |o| o == Ordering::Equal,
        BinaryOperator::NotEq => |o| o != Ordering::Equal,
        BinaryOperator::Lt => |o| o == Ordering::Less,
        BinaryOperator::LtEq => |o| o != Ordering::Greater,
        BinaryOperator::Gt => |o| o == Ordering::Greater,
        BinaryOperator::GtEq => |o| o != Ordering::Less,
        _ => return None,
    })
}

impl<'a> QueryBuilder<'a> {
    /// Compiles one expression into a row closure, attaching any columns it
    /// references.
    pub fn compile_scalar(&mut self, expr: &Expr) -> Result<ScalarFn> {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => self.compile_column(expr),

            Expr::Value(value) => {
                let literal = literal_value(value)?;
                Ok(Arc::new(move |_| Ok(literal.clone())))
            }

            Expr::Nested(inner) => self.compile_scalar(inner),

            Expr::UnaryOp { op, expr: inner } => {
                let operand = self.compile_scalar(inner)?;
                match op {
                    UnaryOperator::Not => Ok(Arc::new(move |row| {
                        Ok(bool_value(tri(&operand(row)?)?.map(|b| !b)))
                    })),
                    UnaryOperator::Minus => {
                        Ok(Arc::new(move |row| operand(row)?.negate()))
                    }
                    UnaryOperator::Plus => Ok(operand),
                    other => Err(Error::unsupported("unary operator", format!("{:?}", other))),
                }
            }

            Expr::BinaryOp { left, op, right } => self.compile_binary(left, op, right),

            Expr::IsNull(inner) => {
                let operand = self.compile_scalar(inner)?;
                Ok(Arc::new(move |row| Ok(Value::Bool(operand(row)?.is_null()))))
            }
            Expr::IsNotNull(inner) => {
                let operand = self.compile_scalar(inner)?;
                Ok(Arc::new(move |row| {
                    Ok(Value::Bool(!operand(row)?.is_null()))
                }))
            }

            Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let operand = self.compile_scalar(inner)?;
                let low = self.compile_scalar(low)?;
                let high = self.compile_scalar(high)?;
                let negated = *negated;
                Ok(Arc::new(move |row| {
                    let v = operand(row)?;
                    let lo = low(row)?;
                    let hi = high(row)?;
                    if v.is_null() || lo.is_null() || hi.is_null() {
                        return Ok(Value::Null);
                    }
                    let inside = v.cmp(&lo) != Ordering::Less && v.cmp(&hi) != Ordering::Greater;
                    Ok(Value::Bool(inside != negated))
                }))
            }

            Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let operand = self.compile_scalar(inner)?;
                let items = list
                    .iter()
                    .map(|e| self.compile_scalar(e))
                    .collect::<Result<Vec<_>>>()?;
                let negated = *negated;
                Ok(Arc::new(move |row| {
                    let v = operand(row)?;
                    if v.is_null() {
                        return Ok(Value::Null);
                    }
                    let mut saw_null = false;
                    for item in &items {
                        let candidate = item(row)?;
                        if candidate.is_null() {
                            saw_null = true;
                        } else if v.cmp(&candidate) == Ordering::Equal {
                            return Ok(Value::Bool(!negated));
                        }
                    }
                    if saw_null {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::Bool(negated))
                    }
                }))
            }

            Expr::Like {
                negated,
                any: false,
                expr: inner,
                pattern,
                escape_char,
            }
            | Expr::ILike {
                negated,
                any: false,
                expr: inner,
                pattern,
                escape_char,
            } => self.compile_like(inner, pattern, escape_char.as_deref(), *negated),

            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => self.compile_case(operand.as_deref(), conditions, results, else_result.as_deref()),

            Expr::Function(function) => self.compile_function(function),

            Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => {
                Err(Error::unsupported("subquery", expr))
            }

            other => Err(Error::unsupported("expression", other)),
        }
    }

    /// A column reference becomes a row-index capture. In aggregate context
    /// the reference must hit a grouped column; elsewhere the column is
    /// attached to its owning node on the fly.
    fn compile_column(&mut self, expr: &Expr) -> Result<ScalarFn> {
        let (qualifier, column) = as_column(expr)
            .ok_or_else(|| Error::unsupported("column reference", expr))?;
        let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
            // In aggregate context an unqualified name may be an output
            // alias of a grouped column or an aggregate.
            if qualifier.is_none() {
                if let Some(idx) = self.grouping.as_ref().and_then(|g| g.find_alias(column)) {
                    return Ok(row_index_selector(idx));
                }
            }
            return Err(Error::UnknownIdentifier(column.to_string()));
        };
        let index = match &self.grouping {
            Some(grouping) => grouping
                .find_column(node, &canonical)
                .map(|k| k.row_index)
                .ok_or_else(|| {
                    Error::unsupported("column not listed in GROUP BY", expr)
                })?,
            None => self.attach_column(node, &canonical),
        };
        Ok(row_index_selector(index))
    }

    fn compile_binary(
        &mut self,
        left: &Expr,
        op: &BinaryOperator,
        right: &Expr,
    ) -> Result<ScalarFn> {
        if let Some(passes) = comparison(op) {
            let lhs = self.compile_scalar(left)?;
            let rhs = self.compile_scalar(right)?;
            return Ok(Arc::new(move |row| {
                let a = lhs(row)?;
                let b = rhs(row)?;
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Bool(passes(a.cmp(&b))))
            }));
        }

        match op {
            BinaryOperator::And => {
                let lhs = self.compile_scalar(left)?;
                let rhs = self.compile_scalar(right)?;
                Ok(Arc::new(move |row| {
                    let a = tri(&lhs(row)?)?;
                    if a == Some(false) {
                        return Ok(Value::Bool(false));
                    }
                    let b = tri(&rhs(row)?)?;
                    Ok(match (a, b) {
                        (_, Some(false)) => Value::Bool(false),
                        (Some(true), Some(true)) => Value::Bool(true),
                        _ => Value::Null,
                    })
                }))
            }
            BinaryOperator::Or => {
                let lhs = self.compile_scalar(left)?;
                let rhs = self.compile_scalar(right)?;
                Ok(Arc::new(move |row| {
                    let a = tri(&lhs(row)?)?;
                    if a == Some(true) {
                        return Ok(Value::Bool(true));
                    }
                    let b = tri(&rhs(row)?)?;
                    Ok(match (a, b) {
                        (_, Some(true)) => Value::Bool(true),
                        (Some(false), Some(false)) => Value::Bool(false),
                        _ => Value::Null,
                    })
                }))
            }
            BinaryOperator::Plus
            | BinaryOperator::Minus
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulo
            | BinaryOperator::StringConcat => {
                let lhs = self.compile_scalar(left)?;
                let rhs = self.compile_scalar(right)?;
                let apply: fn(&Value, &Value) -> Result<Value> = match op {
                    BinaryOperator::Plus => Value::add,
                    BinaryOperator::Minus => Value::subtract,
                    BinaryOperator::Multiply => Value::multiply,
                    BinaryOperator::Divide => Value::divide,
                    BinaryOperator::Modulo => Value::remainder,
                    _ => Value::concat,
                };
                Ok(Arc::new(move |row| {
                    let a = lhs(row)?;
                    let b = rhs(row)?;
                    if a.is_null() || b.is_null() {
                        return Ok(Value::Null);
                    }
                    apply(&a, &b)
                }))
            }
            BinaryOperator::BitwiseAnd | BinaryOperator::BitwiseOr | BinaryOperator::BitwiseXor => {
                let lhs = self.compile_scalar(left)?;
                let rhs = self.compile_scalar(right)?;
                let apply: fn(i64, i64) -> i64 = match op {
                    BinaryOperator::BitwiseAnd => |a, b| a & b,
                    BinaryOperator::BitwiseOr => |a, b| a | b,
                    _ => |a, b| a ^ b,
                };
                Ok(Arc::new(move |row| {
                    match (lhs(row)?, rhs(row)?) {
                        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                        (Value::I64(a), Value::I64(b)) => Ok(Value::I64(apply(a, b))),
                        (a, b) => Err(Error::TypeMismatch {
                            expected: "integer operands".into(),
                            found: format!("{:?}, {:?}", a, b),
                        }),
                    }
                }))
            }
            other => Err(Error::unsupported("operator", format!("{:?}", other))),
        }
    }

    fn compile_like(
        &mut self,
        operand: &Expr,
        pattern: &Expr,
        escape: Option<&str>,
        negated: bool,
    ) -> Result<ScalarFn> {
        let operand = self.compile_scalar(operand)?;
        let escape = escape.and_then(|s| s.chars().next());

        // A literal pattern compiles its regex once; anything else builds it
        // per row.
        if let Expr::Value(ast::Value::SingleQuotedString(text)) = pattern {
            let regex = like_regex(text, escape)?;
            return Ok(Arc::new(move |row| {
                match operand(row)? {
                    Value::Null => Ok(Value::Null),
                    Value::Str(s) => Ok(Value::Bool(regex.is_match(&s) != negated)),
                    other => Err(Error::TypeMismatch {
                        expected: "string".into(),
                        found: format!("{:?}", other),
                    }),
                }
            }));
        }

        let pattern = self.compile_scalar(pattern)?;
        Ok(Arc::new(move |row| {
            let subject = match operand(row)? {
                Value::Null => return Ok(Value::Null),
                Value::Str(s) => s,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "string".into(),
                        found: format!("{:?}", other),
                    })
                }
            };
            let text = match pattern(row)? {
                Value::Null => return Ok(Value::Null),
                Value::Str(s) => s,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "string pattern".into(),
                        found: format!("{:?}", other),
                    })
                }
            };
            let regex = like_regex(&text, escape)?;
            Ok(Value::Bool(regex.is_match(&subject) != negated))
        }))
    }

    fn compile_case(
        &mut self,
        operand: Option<&Expr>,
        conditions: &[Expr],
        results: &[Expr],
        else_result: Option<&Expr>,
    ) -> Result<ScalarFn> {
        // The simple form `CASE x WHEN v ...` tests x against each WHEN value
        // with plain equality.
        let operand = operand.map(|e| self.compile_scalar(e)).transpose()?;
        let mut arms = Vec::with_capacity(conditions.len());
        for (condition, result) in conditions.iter().zip(results) {
            arms.push((self.compile_scalar(condition)?, self.compile_scalar(result)?));
        }
        let fallback = else_result.map(|e| self.compile_scalar(e)).transpose()?;

        Ok(Arc::new(move |row| {
            let subject = operand.as_ref().map(|f| f(row)).transpose()?;
            for (when, then) in &arms {
                let hit = match &subject {
                    Some(subject) => {
                        let candidate = when(row)?;
                        !subject.is_null()
                            && !candidate.is_null()
                            && subject.cmp(&candidate) == Ordering::Equal
                    }
                    None => tri(&when(row)?)? == Some(true),
                };
                if hit {
                    return then(row);
                }
            }
            match &fallback {
                Some(f) => f(row),
                None => Ok(Value::Null),
            }
        }))
    }

    fn compile_function(&mut self, function: &Function) -> Result<ScalarFn> {
        let name = function
            .name
            .0
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default();

        if is_aggregate_name(&name) {
            // HAVING and ORDER BY may repeat an aggregate already in the
            // projection; it resolves to the projected value.
            if let Some(idx) = self
                .grouping
                .as_ref()
                .and_then(|g| g.find_aggregate(&function.to_string()))
            {
                return Ok(row_index_selector(idx));
            }
            return Err(Error::unsupported(
                "aggregate function in this position",
                function,
            ));
        }

        let args = function_args(function)?;

        match name.to_ascii_uppercase().as_str() {
            "DATEPART" => {
                let (part, rest) = self.date_part_args(&name, &args, 2)?;
                let value = self.compile_date_arg(rest[0], part)?;
                if let Some(selector) = value {
                    return Ok(selector);
                }
                let value = self.compile_scalar(rest[0])?;
                Ok(Arc::new(move |row| match value(row)? {
                    Value::Null => Ok(Value::Null),
                    v => date_part(part, &v),
                }))
            }
            "DATEADD" => {
                let (part, rest) = self.date_part_args(&name, &args, 3)?;
                let amount = self.compile_scalar(rest[0])?;
                let value = self.compile_scalar(rest[1])?;
                Ok(Arc::new(move |row| {
                    let n = amount(row)?;
                    let v = value(row)?;
                    if n.is_null() || v.is_null() {
                        return Ok(Value::Null);
                    }
                    date_add(part, &n, &v)
                }))
            }
            "DATEDIFF" => {
                let (part, rest) = self.date_part_args(&name, &args, 3)?;
                let start = self.compile_scalar(rest[0])?;
                let end = self.compile_scalar(rest[1])?;
                Ok(Arc::new(move |row| {
                    let a = start(row)?;
                    let b = end(row)?;
                    if a.is_null() || b.is_null() {
                        return Ok(Value::Null);
                    }
                    date_diff(part, &a, &b)
                }))
            }
            "YEAR" | "MONTH" | "DAY" => {
                let part = match name.to_ascii_uppercase().as_str() {
                    "YEAR" => DatePart::Year,
                    "MONTH" => DatePart::Month,
                    _ => DatePart::Day,
                };
                if args.len() == 1 {
                    if let Some(selector) = self.compile_date_arg(args[0], part)? {
                        return Ok(selector);
                    }
                }
                self.compile_registry_call(&name, &args)
            }
            _ => self.compile_registry_call(&name, &args),
        }
    }

    /// In aggregate context, a date-part extraction over a column grouped by
    /// that same part resolves straight to the grouped value.
    fn compile_date_arg(&mut self, arg: &Expr, part: DatePart) -> Result<Option<ScalarFn>> {
        let Some(grouping) = &self.grouping else {
            return Ok(None);
        };
        let Some((qualifier, column)) = as_column(arg) else {
            return Ok(None);
        };
        let (node, canonical) = self.bindings.resolve(qualifier, column)?;
        match grouping.find_date_part(node, &canonical, part) {
            Some(key) => Ok(Some(row_index_selector(key.row_index))),
            // Grouped by the whole column: extract the part from its value.
            None if grouping.find_column(node, &canonical).is_some() => Ok(None),
            None => Err(Error::unsupported(
                "date part not listed in GROUP BY",
                arg,
            )),
        }
    }

    fn compile_registry_call(&mut self, name: &str, args: &[&Expr]) -> Result<ScalarFn> {
        functions::check(name, args.len())?;
        let compiled = args
            .iter()
            .map(|a| self.compile_scalar(a))
            .collect::<Result<Vec<_>>>()?;
        let name = name.to_string();
        Ok(Arc::new(move |row| {
            let values = compiled
                .iter()
                .map(|f| f(row))
                .collect::<Result<Vec<_>>>()?;
            functions::call(&name, &values)
        }))
    }

    /// Splits off the leading date-part keyword of the date functions,
    /// validating total arity.
    fn date_part_args<'e>(
        &self,
        name: &str,
        args: &[&'e Expr],
        arity: usize,
    ) -> Result<(DatePart, Vec<&'e Expr>)> {
        if args.len() != arity {
            return Err(Error::InvalidValue(format!(
                "{} takes {} argument(s), got {}",
                name,
                arity,
                args.len()
            )));
        }
        let keyword = match args[0] {
            Expr::Identifier(ident) => ident.value.as_str(),
            Expr::Value(ast::Value::SingleQuotedString(s)) => s.as_str(),
            other => return Err(Error::unsupported("date part keyword", other)),
        };
        let part = DatePart::from_keyword(keyword)
            .ok_or_else(|| Error::InvalidValue(format!("unknown date part {}", keyword)))?;
        Ok((part, args[1..].to_vec()))
    }
}

fn row_index_selector(index: usize) -> ScalarFn {
    Arc::new(move |row| Ok(row.get(index).cloned().unwrap_or(Value::Null)))
}

/// Plain positional argument expressions of a call. Wildcards and named
/// arguments have no scalar meaning.
pub(crate) fn function_args(function: &Function) -> Result<Vec<&Expr>> {
    match &function.args {
        FunctionArguments::None => Ok(Vec::new()),
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
                other => Err(Error::unsupported("function argument", other)),
            })
            .collect(),
        FunctionArguments::Subquery(q) => Err(Error::unsupported("subquery argument", q)),
    }
}
