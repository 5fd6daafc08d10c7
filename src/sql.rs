use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, LimitClause, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Option<Ulid>,
        patch: ResourcePatch,
    },
    UpdateResource {
        id: Ulid,
        patch: ResourcePatch,
    },
    InsertWorkingHours {
        id: Option<Ulid>,
        resource_id: Ulid,
        weekday: u8,
        start_minute: u16,
        end_minute: u16,
    },
    DeleteWorkingHours {
        id: Ulid,
    },
    InsertException {
        id: Option<Ulid>,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        kind: ExceptionKind,
    },
    DeleteException {
        id: Ulid,
    },
    InsertExternalEvent {
        id: Option<Ulid>,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        label: Option<String>,
    },
    DeleteExternalEvent {
        id: Ulid,
    },
    InsertHold {
        id: Option<Ulid>,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        returning: bool,
    },
    InsertBooking {
        hold_id: Ulid,
        customer: CustomerInfo,
        returning: bool,
    },
    UpdateBooking {
        id: Ulid,
        status: Option<BookingStatus>,
        payment_status: Option<PaymentStatus>,
    },
    SelectResources,
    SelectWorkingHours {
        resource_id: Ulid,
    },
    SelectExceptions {
        resource_id: Ulid,
    },
    SelectHolds {
        resource_id: Ulid,
    },
    SelectBookings {
        resource_id: Ulid,
    },
    SelectAvailability {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        duration: Option<u32>,
        limit: Option<usize>,
    },
}

// Positional column order per table, used when an INSERT names no columns.
const RESOURCE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "type",
    "slot_granularity",
    "duration",
    "min_notice",
    "booking_window",
    "daily_capacity",
    "concurrent_capacity",
    "buffer_before",
    "buffer_after",
    "is_active",
    "timezone",
];
const WORKING_HOURS_COLUMNS: &[&str] = &["id", "resource_id", "weekday", "start_time", "end_time"];
const EXCEPTION_COLUMNS: &[&str] = &[
    "id",
    "resource_id",
    "start_date",
    "end_date",
    "type",
    "start_time",
    "end_time",
];
const EXTERNAL_EVENT_COLUMNS: &[&str] = &["id", "resource_id", "start", "end", "label"];
const HOLD_COLUMNS: &[&str] = &["id", "resource_id", "start", "end"];
const BOOKING_COLUMNS: &[&str] = &[
    "hold_id",
    "customer_name",
    "customer_email",
    "customer_phone",
    "notes",
    "total_amount",
];
const BOOKING_UPDATE_COLUMNS: &[&str] = &["status", "payment_status"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "resources" => {
            let row = Fields::from_insert(insert, "resources", RESOURCE_COLUMNS)?;
            let patch = resource_patch(&row)?;
            if patch.name.is_none() {
                return Err(SqlError::MissingColumn("resources", "name"));
            }
            Ok(Command::InsertResource {
                id: row.optional_ulid("id")?,
                patch,
            })
        }
        "working_hours" => {
            let row = Fields::from_insert(insert, "working_hours", WORKING_HOURS_COLUMNS)?;
            let weekday = parse_u32(row.require("weekday")?)?;
            Ok(Command::InsertWorkingHours {
                id: row.optional_ulid("id")?,
                resource_id: parse_ulid(row.require("resource_id")?)?,
                weekday: u8::try_from(weekday)
                    .map_err(|_| SqlError::Parse(format!("weekday {weekday} out of range")))?,
                start_minute: parse_time_of_day(row.require("start_time")?)?,
                end_minute: parse_time_of_day(row.require("end_time")?)?,
            })
        }
        "exceptions" => {
            let row = Fields::from_insert(insert, "exceptions", EXCEPTION_COLUMNS)?;
            let from = parse_date(row.require("start_date")?)?;
            let to = match row.get("end_date") {
                Some(e) if !is_null(e) => parse_date(e)?,
                _ => from,
            };
            let kind = match parse_string(row.require("type")?)?.to_ascii_lowercase().as_str() {
                "closed" => ExceptionKind::Closed,
                "open" => ExceptionKind::Open {
                    start_minute: parse_time_of_day(row.require("start_time")?)?,
                    end_minute: parse_time_of_day(row.require("end_time")?)?,
                },
                other => {
                    return Err(SqlError::Parse(format!(
                        "exception type must be 'open' or 'closed', got {other:?}"
                    )));
                }
            };
            Ok(Command::InsertException {
                id: row.optional_ulid("id")?,
                resource_id: parse_ulid(row.require("resource_id")?)?,
                from,
                to,
                kind,
            })
        }
        "external_events" => {
            let row = Fields::from_insert(insert, "external_events", EXTERNAL_EVENT_COLUMNS)?;
            Ok(Command::InsertExternalEvent {
                id: row.optional_ulid("id")?,
                resource_id: parse_ulid(row.require("resource_id")?)?,
                start: parse_timestamp(row.require("start")?)?,
                end: parse_timestamp(row.require("end")?)?,
                label: row.optional_string("label")?,
            })
        }
        "holds" => {
            let row = Fields::from_insert(insert, "holds", HOLD_COLUMNS)?;
            Ok(Command::InsertHold {
                id: row.optional_ulid("id")?,
                resource_id: parse_ulid(row.require("resource_id")?)?,
                start: parse_timestamp(row.require("start")?)?,
                end: parse_timestamp(row.require("end")?)?,
                returning,
            })
        }
        "bookings" => {
            let row = Fields::from_insert(insert, "bookings", BOOKING_COLUMNS)?;
            let total_amount = match row.get("total_amount") {
                Some(e) if !is_null(e) => Some(parse_i64(e)?),
                _ => None,
            };
            Ok(Command::InsertBooking {
                hold_id: parse_ulid(row.require("hold_id")?)?,
                customer: CustomerInfo {
                    name: row.optional_string("customer_name")?.unwrap_or_default(),
                    email: row.optional_string("customer_email")?.unwrap_or_default(),
                    phone: row.optional_string("customer_phone")?,
                    notes: row.optional_string("notes")?,
                    total_amount,
                },
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn resource_patch(fields: &Fields<'_>) -> Result<ResourcePatch, SqlError> {
    let present = |col: &str| fields.get(col).filter(|e| !is_null(e));
    let u32_field = |col: &str| present(col).map(parse_u32).transpose();
    let daily_capacity = match fields.get("daily_capacity") {
        None => None,
        Some(e) if is_null(e) => Some(None),
        Some(e) => Some(Some(parse_u32(e)?)),
    };
    Ok(ResourcePatch {
        name: fields.optional_string("name")?,
        kind: fields.optional_string("type")?,
        slot_granularity: u32_field("slot_granularity")?,
        duration: u32_field("duration")?,
        min_notice: u32_field("min_notice")?,
        booking_window: u32_field("booking_window")?,
        daily_capacity,
        concurrent_capacity: u32_field("concurrent_capacity")?,
        buffer_before: u32_field("buffer_before")?,
        buffer_after: u32_field("buffer_after")?,
        is_active: present("is_active").map(parse_bool).transpose()?,
        timezone: fields.optional_string("timezone")?,
    })
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "resources" => {
            let fields = Fields::from_assignments("resources", assignments, &RESOURCE_COLUMNS[1..])?;
            Ok(Command::UpdateResource {
                id,
                patch: resource_patch(&fields)?,
            })
        }
        "bookings" => {
            let fields = Fields::from_assignments("bookings", assignments, BOOKING_UPDATE_COLUMNS)?;
            let status = match fields.optional_string("status")? {
                Some(s) => Some(
                    BookingStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("unknown booking status {s:?}")))?,
                ),
                None => None,
            };
            let payment_status = match fields.optional_string("payment_status")? {
                Some(s) => Some(
                    PaymentStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("unknown payment status {s:?}")))?,
                ),
                None => None,
            };
            Ok(Command::UpdateBooking {
                id,
                status,
                payment_status,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "working_hours" => Ok(Command::DeleteWorkingHours { id }),
        "exceptions" => Ok(Command::DeleteException { id }),
        "external_events" => Ok(Command::DeleteExternalEvent { id }),
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
        collect_filters(selection, &mut filters)?;
    }
    let filter = |col: &'static str, op: BinaryOperator| {
        filters
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, e)| *e)
    };
    let resource_id = || -> Result<Ulid, SqlError> {
        parse_ulid(filter("resource_id", BinaryOperator::Eq).ok_or(SqlError::MissingFilter("resource_id"))?)
    };

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "working_hours" => Ok(Command::SelectWorkingHours {
            resource_id: resource_id()?,
        }),
        "exceptions" => Ok(Command::SelectExceptions {
            resource_id: resource_id()?,
        }),
        "holds" => Ok(Command::SelectHolds {
            resource_id: resource_id()?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            resource_id: resource_id()?,
        }),
        "availability" => {
            let start = filter("start", BinaryOperator::GtEq).ok_or(SqlError::MissingFilter("start"))?;
            let end = filter("end", BinaryOperator::LtEq).ok_or(SqlError::MissingFilter("end"))?;
            let limit = match &query.limit_clause {
                Some(LimitClause::LimitOffset { limit: Some(n), .. })
                | Some(LimitClause::OffsetCommaLimit { limit: n, .. }) => {
                    Some(parse_u32(n)? as usize)
                }
                _ => None,
            };
            Ok(Command::SelectAvailability {
                resource_id: resource_id()?,
                start: parse_timestamp(start)?,
                end: parse_timestamp(end)?,
                duration: filter("duration", BinaryOperator::Eq).map(parse_u32).transpose()?,
                limit,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a AND b AND ...` into `(column, operator, value)` triples.
fn collect_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push((col, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Column lookup ─────────────────────────────────────────────

/// Column name → value expression for one INSERT row or UPDATE.
struct Fields<'a> {
    table: &'static str,
    entries: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    /// Named columns when the INSERT lists them, otherwise `order`. A
    /// positional row one value short of `order` omits a leading `id`.
    fn from_insert(
        insert: &'a ast::Insert,
        table: &'static str,
        order: &[&str],
    ) -> Result<Self, SqlError> {
        let source = insert
            .source
            .as_ref()
            .ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match source.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let values = match rows.as_slice() {
            [row] => row,
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        };

        let names: Vec<String> = if insert.columns.is_empty() {
            let skip_id = order.first() == Some(&"id") && values.len() + 1 == order.len();
            order
                .iter()
                .skip(usize::from(skip_id))
                .map(|c| c.to_string())
                .collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        let named = !insert.columns.is_empty();
        if values.len() > names.len() || (named && values.len() != names.len()) {
            return Err(SqlError::WrongArity(table, names.len(), values.len()));
        }
        for name in &names {
            if !order.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name.clone()));
            }
        }
        Ok(Self {
            table,
            entries: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn from_assignments(
        table: &'static str,
        assignments: &'a [ast::Assignment],
        allowed: &[&str],
    ) -> Result<Self, SqlError> {
        let mut entries = Vec::with_capacity(assignments.len());
        for a in assignments {
            let name = match &a.target {
                AssignmentTarget::ColumnName(name) => object_name_last(name),
                AssignmentTarget::Tuple(_) => None,
            }
            .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
            if !allowed.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            entries.push((name, &a.value));
        }
        if entries.is_empty() {
            return Err(SqlError::Parse("UPDATE without SET".into()));
        }
        Ok(Self { table, entries })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.entries.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        match self.get(col) {
            Some(e) if !is_null(e) => Ok(e),
            _ => Err(SqlError::MissingColumn(self.table, col)),
        }
    }

    fn optional_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        match self.get(col) {
            Some(e) if !is_null(e) => parse_ulid(e).map(Some),
            _ => Ok(None),
        }
    }

    fn optional_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        match self.get(col) {
            Some(e) if !is_null(e) => parse_string(e).map(Some),
            _ => Ok(None),
        }
    }
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        _ => Err(SqlError::Parse(format!("expected number, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::Parse(format!("expected bool, got {expr}"))),
    }
}

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.parse::<i64>().is_err()
    {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64(expr)
}

/// Minutes after midnight, given as a number or `'HH:MM'`. `24:00` is the end of day.
fn parse_time_of_day(expr: &Expr) -> Result<u16, SqlError> {
    let minutes = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) if s.contains(':') => {
            let (h, m) = s
                .split_once(':')
                .ok_or_else(|| SqlError::Parse(format!("bad time {s:?}")))?;
            let h: u32 = h.trim().parse().map_err(|_| SqlError::Parse(format!("bad time {s:?}")))?;
            let m: u32 = m.trim().parse().map_err(|_| SqlError::Parse(format!("bad time {s:?}")))?;
            if m >= 60 {
                return Err(SqlError::Parse(format!("bad time {s:?}")));
            }
            h * 60 + m
        }
        _ => parse_u32(expr)?,
    };
    if minutes > MINUTES_PER_DAY as u32 {
        return Err(SqlError::Parse(format!("time of day {minutes} past 24:00")));
    }
    Ok(minutes as u16)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
