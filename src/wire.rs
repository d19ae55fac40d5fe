use std::fmt::Debug;
use std::io;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::ShopAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, RowShape};
use crate::tenant::ShopManager;

pub struct BarberQHandler {
    shops: Arc<ShopManager>,
    query_parser: Arc<BarberQQueryParser>,
}

impl BarberQHandler {
    pub fn new(shops: Arc<ShopManager>) -> Self {
        Self {
            shops,
            query_parser: Arc::new(BarberQQueryParser),
        }
    }

    /// The connection's database name picks the shop.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.shops
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("shop error: {e}")))
    }

    /// Parse, run and record one statement.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        debug!(command = label, "executing statement");

        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::SelectAvailableSlots { barber_id, date } => {
                let slots = engine.available_slots(barber_id, &date).map_err(engine_err)?;
                let barber = barber_id.to_string();
                Ok(query_response(RowShape::Slots, slots, |enc, slot| {
                    enc.encode_field(&barber)?;
                    enc.encode_field(&date)?;
                    enc.encode_field(&slot)
                }))
            }
            Command::InsertAppointment(req) => {
                let receipt = engine.book_appointment(req).await.map_err(engine_err)?;
                Ok(query_response(RowShape::BookingReceipt, [receipt], encode_receipt))
            }
            Command::SetAppointmentStatus { id, status } => {
                let result = match status {
                    AppointmentStatus::Scheduled => engine.schedule_appointment(id).await,
                    AppointmentStatus::Canceled => engine.cancel_appointment(id).await,
                    AppointmentStatus::Completed => engine.complete_appointment(id).await,
                    AppointmentStatus::Pending => {
                        return Err(user_error(
                            "22023",
                            "appointments cannot be set back to pending".into(),
                        ));
                    }
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::RescheduleAppointment { id, appointment_time } => {
                let position = engine
                    .reschedule_appointment(id, &appointment_time)
                    .await
                    .map_err(engine_err)?;
                let receipt = BookingReceipt { id, appointment_time, position };
                Ok(query_response(RowShape::BookingReceipt, [receipt], encode_receipt))
            }
            Command::DeleteAppointment { id } => {
                engine.delete_appointment(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAppointmentsOn { date } => {
                let appointments = engine.appointments_on(&date).map_err(engine_err)?;
                Ok(query_response(RowShape::Appointments, appointments, encode_appointment))
            }
            Command::SelectAppointment { id } => {
                let info = engine.get_appointment(id).map_err(engine_err)?;
                Ok(query_response(RowShape::Appointments, [info], encode_appointment))
            }
            Command::InsertQueueEntry { name, status } => {
                let info = engine
                    .join_queue(&name, status.as_deref())
                    .await
                    .map_err(engine_err)?;
                Ok(query_response(RowShape::Queue, [info], encode_queue_entry))
            }
            Command::SelectQueue => {
                Ok(query_response(RowShape::Queue, engine.list_queue(), encode_queue_entry))
            }
            Command::SelectQueueEntry { id } => {
                let info = engine.queue_position(id).map_err(engine_err)?;
                Ok(query_response(RowShape::Queue, [info], encode_queue_entry))
            }
            Command::SetQueueStatus { id, status } => {
                let result = match status {
                    QueueStatus::Canceled => engine.cancel_queue_entry(id).await,
                    QueueStatus::Completed => engine.complete_queue_entry(id).await,
                    QueueStatus::Pending => {
                        return Err(user_error(
                            "22023",
                            "queue entries cannot be set back to pending".into(),
                        ));
                    }
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteQueueEntry { id } => {
                engine.remove_queue_entry(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBarber(new) => {
                let barber = engine.add_barber(new).await.map_err(engine_err)?;
                Ok(query_response(RowShape::Barbers, [barber], encode_barber))
            }
            Command::SelectBarbers => {
                Ok(query_response(RowShape::Barbers, engine.barbers(), encode_barber))
            }
            Command::SelectBarber { id } => {
                let barber = engine.get_barber(id).map_err(engine_err)?;
                Ok(query_response(RowShape::Barbers, [barber], encode_barber))
            }
            Command::DeleteBarber { id } => {
                engine.remove_barber(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertService(new) => {
                let service = engine.add_service(new).await.map_err(engine_err)?;
                Ok(query_response(RowShape::Services, [service], encode_service))
            }
            Command::SelectServices => {
                Ok(query_response(RowShape::Services, engine.services(), encode_service))
            }
            Command::SelectService { id } => {
                let service = engine.get_service(id).map_err(engine_err)?;
                Ok(query_response(RowShape::Services, [service], encode_service))
            }
            Command::UpdateService { id, patch } => {
                let service = engine.update_service(id, patch).await.map_err(engine_err)?;
                Ok(query_response(RowShape::Services, [service], encode_service))
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn query_response<T>(
    shape: RowShape,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema_for(shape));
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

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn schema_for(shape: RowShape) -> Vec<FieldInfo> {
    match shape {
        RowShape::Slots => vec![text("barber_id"), text("date"), text("slot")],
        RowShape::BookingReceipt => vec![text("id"), text("appointment_time"), int8("position")],
        RowShape::Appointments => vec![
            text("id"),
            text("barber_id"),
            text("service_id"),
            text("customer_name"),
            text("customer_email"),
            text("phone_no"),
            text("gender"),
            text("appointment_time"),
            text("appointment_date"),
            text("status"),
            int8("position"),
            int8("live_position"),
            int8("created_at"),
        ],
        RowShape::Queue => vec![
            text("id"),
            text("name"),
            text("status"),
            int8("position"),
            int8("created_at"),
        ],
        RowShape::Barbers => vec![
            text("id"),
            text("name"),
            int8("experience"),
            text("working_hours_start"),
            text("working_hours_end"),
            int8("slot_duration"),
            text("available_days"),
            int8("created_at"),
        ],
        RowShape::Services => vec![
            text("id"),
            text("name"),
            text("type"),
            int8("duration"),
            text("price"),
        ],
    }
}

fn encode_receipt(enc: &mut DataRowEncoder, receipt: BookingReceipt) -> PgWireResult<()> {
    enc.encode_field(&receipt.id.to_string())?;
    enc.encode_field(&receipt.appointment_time)?;
    enc.encode_field(&i64::from(receipt.position))
}

fn encode_appointment(enc: &mut DataRowEncoder, info: AppointmentInfo) -> PgWireResult<()> {
    let a = info.appointment;
    enc.encode_field(&a.id.to_string())?;
    enc.encode_field(&a.barber_id.to_string())?;
    enc.encode_field(&a.service_id.map(|s| s.to_string()))?;
    enc.encode_field(&a.customer.name)?;
    enc.encode_field(&a.customer.email)?;
    enc.encode_field(&a.customer.phone)?;
    enc.encode_field(&a.customer.gender)?;
    enc.encode_field(&a.time.format("%Y-%m-%dT%H:%M:%S").to_string())?;
    enc.encode_field(&a.date().to_string())?;
    enc.encode_field(&a.status.to_string())?;
    enc.encode_field(&i64::from(a.position))?;
    enc.encode_field(&i64::from(info.live_position))?;
    enc.encode_field(&a.created_at)
}

fn encode_queue_entry(enc: &mut DataRowEncoder, info: QueueInfo) -> PgWireResult<()> {
    enc.encode_field(&info.entry.id.to_string())?;
    enc.encode_field(&info.entry.name)?;
    enc.encode_field(&info.entry.status.to_string())?;
    enc.encode_field(&i64::from(info.position))?;
    enc.encode_field(&info.entry.created_at)
}

fn encode_barber(enc: &mut DataRowEncoder, barber: Barber) -> PgWireResult<()> {
    enc.encode_field(&barber.id.to_string())?;
    enc.encode_field(&barber.name)?;
    enc.encode_field(&i64::from(barber.experience))?;
    enc.encode_field(&barber.day_start.format("%H:%M").to_string())?;
    enc.encode_field(&barber.day_end.format("%H:%M").to_string())?;
    enc.encode_field(&i64::from(barber.slot_minutes))?;
    enc.encode_field(&barber.available_days.to_string())?;
    enc.encode_field(&barber.created_at)
}

fn encode_service(enc: &mut DataRowEncoder, service: Service) -> PgWireResult<()> {
    enc.encode_field(&service.id.to_string())?;
    enc.encode_field(&service.name)?;
    enc.encode_field(&service.kind)?;
    enc.encode_field(&i64::from(service.duration_minutes))?;
    enc.encode_field(&service.price.to_string())
}

#[async_trait]
impl SimpleQueryHandler for BarberQHandler {
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
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BarberQQueryParser;

#[async_trait]
impl QueryParser for BarberQQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_rows(stmt))
    }
}

/// Result columns for a statement that has not run yet.
fn describe_rows(sql: &str) -> Vec<FieldInfo> {
    sql::row_shape(sql).map(schema_for).unwrap_or_default()
}

#[async_trait]
impl ExtendedQueryHandler for BarberQHandler {
    type Statement = String;
    type QueryParser = BarberQQueryParser;

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
        let sql = substitute_params(portal);
        self.run(&engine, &sql).await
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
            describe_rows(&target.statement),
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
        Ok(DescribePortalResponse::new(describe_rows(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    scan_placeholders(sql, |_, n| max = max.max(n));
    max
}

/// Walk `sql` left to right, calling `on_param(span, n)` for each `$n`
/// outside a single-quoted literal. `''` inside a literal is an escape.
fn scan_placeholders(sql: &str, mut on_param: impl FnMut(std::ops::Range<usize>, usize)) {
    let bytes = sql.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    on_param(start..i, n);
                }
            }
            _ => i += 1,
        }
    }
}

/// Replace `$1`, `$2`, ... with bound values as quoted text literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &values)
}

/// Single pass over the original text: bound values are never rescanned,
/// and placeholders with no bound value are left as written.
fn substitute(sql: &str, values: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    scan_placeholders(sql, |span, n| {
        let Some(value) = n.checked_sub(1).and_then(|i| values.get(i)) else {
            return;
        };
        result.push_str(&sql[copied..span.start]);
        match value {
            Some(text) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = span.end;
    });
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BarberQFactory {
    handler: Arc<BarberQHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ShopAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BarberQFactory {
    pub fn new(shops: Arc<ShopManager>, password: String) -> Self {
        Self {
            handler: Arc::new(BarberQHandler::new(shops)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ShopAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BarberQFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    shops: Arc<ShopManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(BarberQFactory::new(shops, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) | EngineError::NoAppointmentsOn(_) => "P0002",
        EngineError::InvalidDate(_) | EngineError::InvalidTimestamp(_) => "22007",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
        _ => "22023",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(detail) = &e {
        error!("WAL failure: {detail}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM queue"), 0);
        assert_eq!(count_params("INSERT INTO queue VALUES ($1, $2)"), 2);
        assert_eq!(count_params("UPDATE services SET price = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $12"), 12);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn substitution_quotes_and_escapes() {
        let sql = "INSERT INTO queue VALUES ($1, $2)";
        let out = substitute(sql, &[Some("O'Brien".into()), None]);
        assert_eq!(out, "INSERT INTO queue VALUES ('O''Brien', NULL)");
    }

    #[test]
    fn substitution_handles_double_digit_placeholders() {
        let values: Vec<Option<String>> = (1..=10).map(|i| Some(format!("v{i}"))).collect();
        let out = substitute("$1 $10", &values);
        assert_eq!(out, "'v1' 'v10'");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO queue VALUES ($1, $2)";
        let out = substitute(sql, &[Some("Ann".into()), Some("vip$1".into())]);
        assert_eq!(out, "INSERT INTO queue VALUES ('Ann', 'vip$1')");

        let out = substitute("$2 $1", &[Some("$2".into()), Some("x".into())]);
        assert_eq!(out, "'x' '$2'");
    }

    #[test]
    fn placeholders_inside_literals_are_text() {
        let sql = "INSERT INTO queue VALUES ($1, 'costs $1 ''each''')";
        assert_eq!(count_params(sql), 1);
        let out = substitute(sql, &[Some("Ann".into())]);
        assert_eq!(out, "INSERT INTO queue VALUES ('Ann', 'costs $1 ''each''')");
    }

    #[test]
    fn unbound_placeholders_are_left_alone() {
        assert_eq!(substitute("SELECT $1, $3, $0", &[Some("a".into())]), "SELECT 'a', $3, $0");
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let id = Ulid::nil();
        let date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        let cases = [
            (EngineError::NotFound(crate::engine::Entity::Barber, id), "P0002"),
            (EngineError::NoAppointmentsOn(date), "P0002"),
            (EngineError::InvalidDate("x".into()), "22007"),
            (EngineError::InvalidTimestamp("x".into()), "22007"),
            (EngineError::InvalidSlotDuration(0), "22023"),
            (EngineError::EmptyField("name"), "22023"),
            (
                EngineError::InvalidTransition {
                    id,
                    from: AppointmentStatus::Canceled,
                    to: AppointmentStatus::Scheduled,
                },
                "55000",
            ),
            (EngineError::LimitExceeded("queue"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }

    #[test]
    fn described_columns_follow_statement() {
        let names = |sql: &str| -> Vec<String> {
            describe_rows(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names("SELECT * FROM available_slots WHERE barber_id = $1 AND date = $2"),
            ["barber_id", "date", "slot"]
        );
        assert_eq!(
            names("INSERT INTO appointments VALUES ($1, $2, $3, $4)"),
            ["id", "appointment_time", "position"]
        );
        assert!(names("DELETE FROM queue WHERE id = $1").is_empty());
        assert_eq!(names("SELECT * FROM queue")[3], "position");
    }
}
