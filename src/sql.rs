use rust_decimal::Decimal;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use ulid::Ulid;

use crate::engine::{BookingRequest, NewBarber, NewService, ServicePatch};
use crate::model::*;

/// Parsed command from SQL input. Every table is virtual; each statement maps
/// to exactly one engine operation.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailableSlots {
        barber_id: Ulid,
        date: String,
    },
    InsertAppointment(BookingRequest),
    SetAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    RescheduleAppointment {
        id: Ulid,
        appointment_time: String,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectAppointmentsOn {
        date: String,
    },
    SelectAppointment {
        id: Ulid,
    },
    InsertQueueEntry {
        name: String,
        status: Option<String>,
    },
    SelectQueue,
    SelectQueueEntry {
        id: Ulid,
    },
    SetQueueStatus {
        id: Ulid,
        status: QueueStatus,
    },
    DeleteQueueEntry {
        id: Ulid,
    },
    InsertBarber(NewBarber),
    SelectBarbers,
    SelectBarber {
        id: Ulid,
    },
    DeleteBarber {
        id: Ulid,
    },
    InsertService(NewService),
    SelectServices,
    SelectService {
        id: Ulid,
    },
    UpdateService {
        id: Ulid,
        patch: ServicePatch,
    },
    DeleteService {
        id: Ulid,
    },
}

/// Row shape a statement produces, known before it runs (for Describe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Slots,
    Appointments,
    BookingReceipt,
    Queue,
    Barbers,
    Services,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlError::Empty);
    }
    if first_word(trimmed).as_deref() == Some("update") {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// What rows `sql` will answer with, if any. Works on unbound `$n` statements.
pub fn row_shape(sql: &str) -> Option<RowShape> {
    let words = significant_tokens(sql).ok()?;
    let word_at = |i: usize| match words.get(i) {
        Some(Token::Word(w)) => Some(w.value.to_ascii_lowercase()),
        _ => None,
    };
    let verb = word_at(0)?;
    let table = match verb.as_str() {
        "select" => {
            let from = (0..words.len()).find(|&i| word_at(i).as_deref() == Some("from"))?;
            word_at(from + 1)?
        }
        "insert" => word_at(2)?,
        "update" => word_at(1)?,
        _ => return None,
    };
    let sets_time = || (0..words.len()).any(|i| word_at(i).as_deref() == Some("appointment_time"));
    match (verb.as_str(), table.as_str()) {
        ("select", "available_slots") => Some(RowShape::Slots),
        ("select", "appointments") => Some(RowShape::Appointments),
        ("insert", "appointments") => Some(RowShape::BookingReceipt),
        ("update", "appointments") if sets_time() => Some(RowShape::BookingReceipt),
        ("update", "queue") => None,
        (_, "queue") => Some(RowShape::Queue),
        ("update", "barbers") => None,
        (_, "barbers") => Some(RowShape::Barbers),
        (_, "services") => Some(RowShape::Services),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let row = Row { table: static_table(&table)?, values: &values };

    match row.table {
        "appointments" => Ok(Command::InsertAppointment(BookingRequest {
            barber_id: parse_ulid("barber_id", &row.required(0, "barber_id", 4)?)?,
            customer_name: row.required(1, "customer_name", 4)?,
            customer_email: row.required(2, "customer_email", 4)?,
            appointment_time: row.required(3, "appointment_time", 4)?,
            service: row.optional(4)?,
            phone: row.optional(5)?,
            gender: row.optional(6)?,
        })),
        "queue" => Ok(Command::InsertQueueEntry {
            name: row.required(0, "name", 1)?,
            status: row.optional(1)?,
        }),
        "barbers" => Ok(Command::InsertBarber(NewBarber {
            name: row.required(0, "name", 1)?,
            experience: row.optional(1)?.map(|v| parse_u32("experience", &v)).transpose()?,
            day_start: row.optional(2)?.map(|v| parse_time("working_hours_start", &v)).transpose()?,
            day_end: row.optional(3)?.map(|v| parse_time("working_hours_end", &v)).transpose()?,
            slot_minutes: row.optional(4)?.map(|v| parse_u32("slot_duration", &v)).transpose()?,
            available_days: row.optional(5)?.map(|v| parse_days(&v)).transpose()?,
        })),
        "services" => Ok(Command::InsertService(NewService {
            name: row.required(0, "name", 1)?,
            kind: row.optional(1)?,
            duration_minutes: row.optional(2)?.map(|v| parse_u32("duration", &v)).transpose()?,
            price: row.optional(3)?.map(|v| parse_price(&v)).transpose()?,
        })),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row, read positionally.
struct Row<'a> {
    table: &'static str,
    values: &'a [Expr],
}

impl Row<'_> {
    fn required(
        &self,
        idx: usize,
        column: &'static str,
        min_arity: usize,
    ) -> Result<String, SqlError> {
        let expr = self
            .values
            .get(idx)
            .ok_or(SqlError::WrongArity(self.table, min_arity, self.values.len()))?;
        literal(expr)?.ok_or(SqlError::NullValue(column))
    }

    /// Missing trailing values and NULL both read as `None`.
    fn optional(&self, idx: usize) -> Result<Option<String>, SqlError> {
        self.values.get(idx).map(literal).transpose().map(Option::flatten)
    }
}

fn static_table(name: &str) -> Result<&'static str, SqlError> {
    ["appointments", "queue", "barbers", "services", "available_slots"]
        .into_iter()
        .find(|t| *t == name)
        .ok_or_else(|| SqlError::UnknownTable(name.to_string()))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "appointments" => Ok(Command::DeleteAppointment { id }),
        "queue" => Ok(Command::DeleteQueueEntry { id }),
        "barbers" => Ok(Command::DeleteBarber { id }),
        "services" => Ok(Command::DeleteService { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |column: &str| -> Result<Option<String>, SqlError> {
        match filters.iter().find(|(c, _)| c == column) {
            Some((_, expr)) => literal(expr),
            None => Ok(None),
        }
    };
    let id_filter = || -> Result<Option<Ulid>, SqlError> {
        filter("id")?.map(|v| parse_ulid("id", &v)).transpose()
    };

    match table.as_str() {
        "available_slots" => Ok(Command::SelectAvailableSlots {
            barber_id: parse_ulid(
                "barber_id",
                &filter("barber_id")?.ok_or(SqlError::MissingFilter("barber_id"))?,
            )?,
            date: filter("date")?.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "appointments" => {
            if let Some(id) = id_filter()? {
                return Ok(Command::SelectAppointment { id });
            }
            let date = filter("date")?
                .or(filter("appointment_date")?)
                .ok_or(SqlError::MissingFilter("date"))?;
            Ok(Command::SelectAppointmentsOn { date })
        }
        "queue" => Ok(match id_filter()? {
            Some(id) => Command::SelectQueueEntry { id },
            None => Command::SelectQueue,
        }),
        "barbers" => Ok(match id_filter()? {
            Some(id) => Command::SelectBarber { id },
            None => Command::SelectBarbers,
        }),
        "services" => Ok(match id_filter()? {
            Some(id) => Command::SelectService { id },
            None => Command::SelectServices,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b = 2` into `[(a, 1), (b, 2)]`. Anything else is rejected.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── UPDATE ────────────────────────────────────────────────────
//
// Only `UPDATE <table> SET col = literal[, ...] WHERE id = literal` is
// accepted, so it is read straight off the token stream.

fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let tokens = significant_tokens(sql)?;
    let mut cursor = TokenCursor { tokens: &tokens, pos: 0 };

    cursor.expect_word("update")?;
    let table = cursor.identifier()?;
    cursor.expect_word("set")?;

    let mut assignments = Vec::new();
    loop {
        let column = cursor.identifier()?;
        cursor.expect(&Token::Eq)?;
        assignments.push((column, cursor.literal()?));
        if !cursor.eat(&Token::Comma) {
            break;
        }
    }

    cursor.expect_word("where")?;
    let where_column = cursor.identifier()?;
    if where_column != "id" {
        return Err(SqlError::MissingFilter("id"));
    }
    cursor.expect(&Token::Eq)?;
    let id = parse_ulid("id", &cursor.literal()?.ok_or(SqlError::NullValue("id"))?)?;
    cursor.eat(&Token::SemiColon);
    cursor.expect_end()?;

    match table.as_str() {
        "appointments" => update_appointment(id, assignments),
        "queue" => update_queue(id, assignments),
        "services" => update_service(id, assignments),
        "barbers" | "available_slots" => Err(SqlError::Unsupported(format!("UPDATE {table}"))),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_assignment(
    table: &'static str,
    mut assignments: Vec<(String, Option<String>)>,
) -> Result<(String, Option<String>), SqlError> {
    if assignments.len() != 1 {
        return Err(SqlError::Unsupported(format!(
            "{table}: set exactly one column per UPDATE"
        )));
    }
    Ok(assignments.remove(0))
}

fn update_appointment(
    id: Ulid,
    assignments: Vec<(String, Option<String>)>,
) -> Result<Command, SqlError> {
    let (column, value) = single_assignment("appointments", assignments)?;
    match column.as_str() {
        "status" => {
            let raw = value.ok_or(SqlError::NullValue("status"))?;
            match AppointmentStatus::parse(&raw) {
                Some(AppointmentStatus::Pending) => Err(SqlError::InvalidValue(
                    "status",
                    "appointments cannot be set back to pending".into(),
                )),
                Some(status) => Ok(Command::SetAppointmentStatus { id, status }),
                None => Err(SqlError::InvalidValue("status", raw)),
            }
        }
        "appointment_time" => Ok(Command::RescheduleAppointment {
            id,
            appointment_time: value.ok_or(SqlError::NullValue("appointment_time"))?,
        }),
        _ => Err(SqlError::UnknownColumn(column)),
    }
}

fn update_queue(id: Ulid, assignments: Vec<(String, Option<String>)>) -> Result<Command, SqlError> {
    let (column, value) = single_assignment("queue", assignments)?;
    if column != "status" {
        return Err(SqlError::UnknownColumn(column));
    }
    let raw = value.ok_or(SqlError::NullValue("status"))?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "canceled" | "cancelled" => Ok(Command::SetQueueStatus {
            id,
            status: QueueStatus::Canceled,
        }),
        "completed" => Ok(Command::SetQueueStatus {
            id,
            status: QueueStatus::Completed,
        }),
        _ => Err(SqlError::InvalidValue("status", raw)),
    }
}

fn update_service(
    id: Ulid,
    assignments: Vec<(String, Option<String>)>,
) -> Result<Command, SqlError> {
    let mut patch = ServicePatch::default();
    for (column, value) in assignments {
        match column.as_str() {
            "name" => patch.name = Some(value.ok_or(SqlError::NullValue("name"))?),
            "type" | "kind" => patch.kind = Some(value),
            "duration" | "duration_minutes" => {
                let raw = value.ok_or(SqlError::NullValue("duration"))?;
                patch.duration_minutes = Some(parse_u32("duration", &raw)?);
            }
            "price" => {
                let raw = value.ok_or(SqlError::NullValue("price"))?;
                patch.price = Some(parse_price(&raw)?);
            }
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }
    Ok(Command::UpdateService { id, patch })
}

fn significant_tokens(sql: &str) -> Result<Vec<Token>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect())
}

fn first_word(sql: &str) -> Option<String> {
    sql.split_whitespace().next().map(str::to_ascii_lowercase)
}

struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl TokenCursor<'_> {
    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SqlError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(SqlError::Parse(format!("expected {expected} at token {}", self.pos)))
        }
    }

    fn expect_word(&mut self, keyword: &str) -> Result<(), SqlError> {
        match self.next() {
            Some(Token::Word(w))
                if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword) =>
            {
                Ok(())
            }
            other => Err(SqlError::Parse(format!(
                "expected {}, got {}",
                keyword.to_uppercase(),
                describe_token(other)
            ))),
        }
    }

    fn identifier(&mut self) -> Result<String, SqlError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w.value.to_lowercase()),
            other => Err(SqlError::Parse(format!(
                "expected identifier, got {}",
                describe_token(other)
            ))),
        }
    }

    /// A literal value; `NULL` is `None`.
    fn literal(&mut self) -> Result<Option<String>, SqlError> {
        match self.next() {
            Some(Token::SingleQuotedString(s)) => Ok(Some(s.clone())),
            Some(Token::Number(n, _)) => Ok(Some(n.clone())),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(n, _)) => Ok(Some(format!("-{n}"))),
                other => Err(SqlError::Parse(format!(
                    "expected number, got {}",
                    describe_token(other)
                ))),
            },
            Some(Token::Word(w))
                if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("null") =>
            {
                Ok(None)
            }
            Some(Token::Word(w))
                if w.quote_style.is_none()
                    && (w.value.eq_ignore_ascii_case("true")
                        || w.value.eq_ignore_ascii_case("false")) =>
            {
                Ok(Some(w.value.to_lowercase()))
            }
            other => Err(SqlError::Parse(format!(
                "expected literal, got {}",
                describe_token(other)
            ))),
        }
    }

    fn expect_end(&mut self) -> Result<(), SqlError> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(t) => Err(SqlError::Unsupported(format!("trailing input at {t}"))),
        }
    }
}

fn describe_token(token: Option<&Token>) -> String {
    token.map_or_else(|| "end of input".to_string(), |t| t.to_string())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => {
            let raw = literal(right)?.ok_or(SqlError::NullValue("id"))?;
            parse_ulid("id", &raw)
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Text of a literal expression. `NULL` is `None`.
fn literal(expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            Value::Null => Ok(None),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => Ok(literal(expr)?.map(|v| format!("-{v}"))),
        other => Err(SqlError::Parse(format!("expected literal, got {other}"))),
    }
}

fn parse_ulid(column: &'static str, raw: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(raw.trim())
        .map_err(|e| SqlError::InvalidValue(column, format!("bad ULID {raw:?}: {e}")))
}

fn parse_u32(column: &'static str, raw: &str) -> Result<u32, SqlError> {
    raw.trim()
        .parse()
        .map_err(|_| {
            SqlError::InvalidValue(column, format!("{raw:?} is not a non-negative integer"))
        })
}

fn parse_time(column: &'static str, raw: &str) -> Result<chrono::NaiveTime, SqlError> {
    parse_clock(raw).ok_or_else(|| SqlError::InvalidValue(column, format!("{raw:?} is not HH:MM")))
}

fn parse_days(raw: &str) -> Result<DaySet, SqlError> {
    DaySet::parse(raw).ok_or_else(|| SqlError::InvalidValue("available_days", raw.to_string()))
}

fn parse_price(raw: &str) -> Result<Decimal, SqlError> {
    raw.trim()
        .parse()
        .map_err(|_| SqlError::InvalidValue("price", format!("{raw:?} is not a decimal")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    NullValue(&'static str),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::NullValue(col) => write!(f, "{col} must not be NULL"),
            SqlError::InvalidValue(col, detail) => write!(f, "invalid {col}: {detail}"),
        }
    }
}

impl std::error::Error for SqlError {}
