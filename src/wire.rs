use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

pub struct SlotdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(
        &self,
        engine: &Engine,
        requester: &str,
        query: &str,
        format: Option<&Format>,
    ) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, requester, cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        requester: &str,
        cmd: Command,
        format: Option<&Format>,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource { id, patch } => {
                let mut config =
                    ResourceConfig::new(id.unwrap_or_else(Ulid::new), requester, String::new());
                patch.apply(&mut config);
                engine.create_resource(config).await.map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::UpdateResource { id, patch } => {
                engine
                    .update_resource(id, patch, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::InsertWorkingHours {
                id,
                resource_id,
                weekday,
                start_minute,
                end_minute,
            } => {
                let rule = WorkingHours {
                    id: id.unwrap_or_else(Ulid::new),
                    weekday,
                    start_minute,
                    end_minute,
                };
                engine
                    .add_working_hours(resource_id, rule, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteWorkingHours { id } => {
                engine
                    .remove_working_hours(id, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertException {
                id,
                resource_id,
                from,
                to,
                kind,
            } => {
                let exception = CalendarException {
                    id: id.unwrap_or_else(Ulid::new),
                    from,
                    to,
                    kind,
                };
                engine
                    .add_exception(resource_id, exception, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteException { id } => {
                engine
                    .remove_exception(id, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertExternalEvent {
                id,
                resource_id,
                start,
                end,
                label,
            } => {
                engine
                    .add_external_event(
                        id.unwrap_or_else(Ulid::new),
                        resource_id,
                        checked_span(start, end)?,
                        label,
                        requester,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("INSERT", 1)])
            }
            Command::DeleteExternalEvent { id } => {
                engine
                    .remove_external_event(id, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("DELETE", 1)])
            }
            Command::InsertHold {
                id,
                resource_id,
                start,
                end,
                returning,
            } => {
                let hold = engine
                    .create_hold(
                        id.unwrap_or_else(Ulid::new),
                        resource_id,
                        checked_span(start, end)?,
                        requester,
                    )
                    .await
                    .map_err(engine_err)?;
                if !returning {
                    return Ok(vec![tag("INSERT", 1)]);
                }
                let cfg = engine
                    .resource_config(hold.resource_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(
                    Shape::Hold,
                    format,
                    [hold],
                    |enc, hold| {
                        enc.encode_field(&hold.id.to_string())?;
                        enc.encode_field(&hold.expires_at)?;
                        enc.encode_field(&cfg.name)?;
                        enc.encode_field(&hold.span.start)?;
                        enc.encode_field(&hold.span.end)
                    },
                )])
            }
            Command::InsertBooking {
                hold_id,
                customer,
                returning,
            } => {
                let booking = engine
                    .confirm_booking(hold_id, customer, requester)
                    .await
                    .map_err(engine_err)?;
                if !returning {
                    return Ok(vec![tag("INSERT", 1)]);
                }
                let cfg = engine
                    .resource_config(booking.resource_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(
                    Shape::Booking,
                    format,
                    [booking],
                    |enc, b| {
                        enc.encode_field(&b.id.to_string())?;
                        enc.encode_field(&b.status.as_str())?;
                        enc.encode_field(&b.payment_status.as_str())?;
                        enc.encode_field(&cfg.name)?;
                        enc.encode_field(&cfg.kind)?;
                        enc.encode_field(&b.span.start)?;
                        enc.encode_field(&b.span.end)?;
                        enc.encode_field(&b.customer.name)?;
                        enc.encode_field(&b.customer.total_amount)
                    },
                )])
            }
            Command::UpdateBooking {
                id,
                status,
                payment_status,
            } => {
                engine
                    .update_booking(id, status, payment_status, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![tag("UPDATE", 1)])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                Ok(vec![query_response(
                    Shape::Resources,
                    format,
                    resources,
                    |enc, r| {
                        enc.encode_field(&r.id.to_string())?;
                        enc.encode_field(&r.name)?;
                        enc.encode_field(&r.kind)?;
                        enc.encode_field(&r.owner)?;
                        enc.encode_field(&(r.slot_granularity as i64))?;
                        enc.encode_field(&(r.duration as i64))?;
                        enc.encode_field(&(r.min_notice as i64))?;
                        enc.encode_field(&(r.booking_window as i64))?;
                        enc.encode_field(&r.daily_capacity.map(|c| c as i64))?;
                        enc.encode_field(&(r.concurrent_capacity as i64))?;
                        enc.encode_field(&(r.buffer_before as i64))?;
                        enc.encode_field(&(r.buffer_after as i64))?;
                        enc.encode_field(&r.is_active)?;
                        enc.encode_field(&r.timezone)
                    },
                )])
            }
            Command::SelectWorkingHours { resource_id } => {
                let rules = engine
                    .get_working_hours(resource_id)
                    .await
                    .map_err(engine_err)?;
                let rid = resource_id.to_string();
                Ok(vec![query_response(
                    Shape::WorkingHours,
                    format,
                    rules,
                    |enc, r| {
                        enc.encode_field(&r.id.to_string())?;
                        enc.encode_field(&rid)?;
                        enc.encode_field(&(r.weekday as i64))?;
                        enc.encode_field(&clock_time(r.start_minute))?;
                        enc.encode_field(&clock_time(r.end_minute))
                    },
                )])
            }
            Command::SelectExceptions { resource_id } => {
                let exceptions = engine
                    .get_exceptions(resource_id)
                    .await
                    .map_err(engine_err)?;
                let rid = resource_id.to_string();
                Ok(vec![query_response(
                    Shape::Exceptions,
                    format,
                    exceptions,
                    |enc, e| {
                        let (kind, start, end) = match e.kind {
                            ExceptionKind::Closed => ("closed", None, None),
                            ExceptionKind::Open {
                                start_minute,
                                end_minute,
                            } => (
                                "open",
                                Some(clock_time(start_minute)),
                                Some(clock_time(end_minute)),
                            ),
                        };
                        enc.encode_field(&e.id.to_string())?;
                        enc.encode_field(&rid)?;
                        enc.encode_field(&e.from.to_string())?;
                        enc.encode_field(&e.to.to_string())?;
                        enc.encode_field(&kind)?;
                        enc.encode_field(&start)?;
                        enc.encode_field(&end)
                    },
                )])
            }
            Command::SelectHolds { resource_id } => {
                let holds = engine
                    .get_holds(resource_id, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(Shape::Holds, format, holds, |enc, h| {
                    enc.encode_field(&h.id.to_string())?;
                    enc.encode_field(&h.resource_id.to_string())?;
                    enc.encode_field(&h.span.start)?;
                    enc.encode_field(&h.span.end)?;
                    enc.encode_field(&h.status.as_str())?;
                    enc.encode_field(&h.created_by)?;
                    enc.encode_field(&h.expires_at)
                })])
            }
            Command::SelectBookings { resource_id } => {
                let bookings = engine
                    .get_bookings(resource_id, requester)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(
                    Shape::Bookings,
                    format,
                    bookings,
                    |enc, b| {
                        enc.encode_field(&b.id.to_string())?;
                        enc.encode_field(&b.hold_id.to_string())?;
                        enc.encode_field(&b.resource_id.to_string())?;
                        enc.encode_field(&b.span.start)?;
                        enc.encode_field(&b.span.end)?;
                        enc.encode_field(&b.status.as_str())?;
                        enc.encode_field(&b.payment_status.as_str())?;
                        enc.encode_field(&b.customer.name)?;
                        enc.encode_field(&b.customer.email)?;
                        enc.encode_field(&b.customer.total_amount)?;
                        enc.encode_field(&b.created_by)
                    },
                )])
            }
            Command::SelectAvailability {
                resource_id,
                start,
                end,
                duration,
                limit,
            } => {
                if start >= end {
                    return Err(engine_err(EngineError::Validation(
                        "query end must be after start".into(),
                    )));
                }
                let availability = engine
                    .availability(resource_id, Span::new(start, end), duration, limit)
                    .await
                    .map_err(engine_err)?;

                let rid = availability.resource_id.to_string();
                Ok(vec![query_response(
                    Shape::Availability,
                    format,
                    availability.slots,
                    |enc, slot| {
                        enc.encode_field(&rid)?;
                        enc.encode_field(&slot.start)?;
                        enc.encode_field(&slot.end)?;
                        enc.encode_field(&availability.resource_name)?;
                        enc.encode_field(&availability.resource_kind)?;
                        enc.encode_field(&availability.timezone)
                    },
                )])
            }
        }
    }
}

fn requester<C: ClientInfo>(client: &C) -> String {
    client.metadata().get("user").cloned().unwrap_or_default()
}

fn tag(command: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(command).with_rows(rows))
}

fn checked_span(start: Ms, end: Ms) -> PgWireResult<Span> {
    Span::checked(start, end)
        .ok_or_else(|| engine_err(EngineError::Validation("end must be after start".into())))
}

/// `HH:MM`, with 1440 rendered as `24:00`.
fn clock_time(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

fn query_response<T>(
    shape: Shape,
    format: Option<&Format>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(shape.schema(format));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result shapes ────────────────────────────────────────────────

/// Row layout of every statement that returns rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Availability,
    Hold,
    Booking,
    Resources,
    WorkingHours,
    Exceptions,
    Holds,
    Bookings,
}

impl Shape {
    fn columns(self) -> Vec<(&'static str, Type)> {
        match self {
            Shape::Availability => vec![
                ("resource_id", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("resource_name", Type::VARCHAR),
                ("resource_type", Type::VARCHAR),
                ("timezone", Type::VARCHAR),
            ],
            Shape::Hold => vec![
                ("hold_id", Type::VARCHAR),
                ("expires_at", Type::INT8),
                ("resource_name", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
            ],
            Shape::Booking => vec![
                ("booking_id", Type::VARCHAR),
                ("status", Type::VARCHAR),
                ("payment_status", Type::VARCHAR),
                ("resource_name", Type::VARCHAR),
                ("resource_type", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("customer_name", Type::VARCHAR),
                ("total_amount", Type::INT8),
            ],
            Shape::Resources => vec![
                ("id", Type::VARCHAR),
                ("name", Type::VARCHAR),
                ("type", Type::VARCHAR),
                ("owner", Type::VARCHAR),
                ("slot_granularity", Type::INT8),
                ("duration", Type::INT8),
                ("min_notice", Type::INT8),
                ("booking_window", Type::INT8),
                ("daily_capacity", Type::INT8),
                ("concurrent_capacity", Type::INT8),
                ("buffer_before", Type::INT8),
                ("buffer_after", Type::INT8),
                ("is_active", Type::BOOL),
                ("timezone", Type::VARCHAR),
            ],
            Shape::WorkingHours => vec![
                ("id", Type::VARCHAR),
                ("resource_id", Type::VARCHAR),
                ("weekday", Type::INT8),
                ("start_time", Type::VARCHAR),
                ("end_time", Type::VARCHAR),
            ],
            Shape::Exceptions => vec![
                ("id", Type::VARCHAR),
                ("resource_id", Type::VARCHAR),
                ("start_date", Type::VARCHAR),
                ("end_date", Type::VARCHAR),
                ("type", Type::VARCHAR),
                ("start_time", Type::VARCHAR),
                ("end_time", Type::VARCHAR),
            ],
            Shape::Holds => vec![
                ("id", Type::VARCHAR),
                ("resource_id", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("status", Type::VARCHAR),
                ("created_by", Type::VARCHAR),
                ("expires_at", Type::INT8),
            ],
            Shape::Bookings => vec![
                ("id", Type::VARCHAR),
                ("hold_id", Type::VARCHAR),
                ("resource_id", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("status", Type::VARCHAR),
                ("payment_status", Type::VARCHAR),
                ("customer_name", Type::VARCHAR),
                ("customer_email", Type::VARCHAR),
                ("total_amount", Type::INT8),
                ("created_by", Type::VARCHAR),
            ],
        }
    }

    fn schema(self, format: Option<&Format>) -> Vec<FieldInfo> {
        self.columns()
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| {
                let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
                FieldInfo::new(name.into(), None, None, ty, field_format)
            })
            .collect()
    }

    /// Guess the row layout of a statement before its parameters are bound.
    fn of_sql(sql: &str) -> Option<Shape> {
        let upper = sql.to_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        let after = |keyword: &str| {
            words
                .iter()
                .position(|w| *w == keyword)
                .and_then(|i| words.get(i + 1))
                .map(|w| w.trim_matches(|c: char| c == '"' || c == ';' || c == '('))
        };
        match words.first().copied() {
            Some("SELECT") => match after("FROM")? {
                "AVAILABILITY" => Some(Shape::Availability),
                "RESOURCES" => Some(Shape::Resources),
                "WORKING_HOURS" => Some(Shape::WorkingHours),
                "EXCEPTIONS" => Some(Shape::Exceptions),
                "HOLDS" => Some(Shape::Holds),
                "BOOKINGS" => Some(Shape::Bookings),
                _ => None,
            },
            Some("INSERT") if words.contains(&"RETURNING") => match after("INTO")? {
                "HOLDS" => Some(Shape::Hold),
                "BOOKINGS" => Some(Shape::Booking),
                _ => None,
            },
            _ => None,
        }
    }
}

fn describe_sql(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    Shape::of_sql(sql).map_or_else(Vec::new, |shape| shape.schema(format))
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let requester = requester(client);
        self.run(&engine, &requester, query, None).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_sql(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let requester = requester(client);
        let sql = substitute_params(portal);
        let responses = self
            .run(&engine, &requester, &sql, Some(&portal.result_column_format))
            .await?;
        responses.into_iter().next().ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "XX000".into(),
                "statement produced no response".into(),
            )))
        })
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_sql(&target.statement, None),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe_sql(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_text_params(&portal.statement.statement, &params)
}

/// Highest placeholder first, so `$1` never clobbers the prefix of `$10`.
fn bind_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_state(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sql_state(&e).into(),
        e.to_string(),
    )))
}
