use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::{format::Writer, FormatEvent, FormatFields};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Span fields shown in their own column instead of the field list
const COLUMN_FIELDS: &[&str] = &["chain", "action"];

#[derive(Debug, Clone)]
pub struct CustomSpanFields {
    pub filtered_display: String,
    pub raw_fields: HashMap<String, String>,
}

impl CustomSpanFields {
    fn new() -> Self {
        Self { filtered_display: String::new(), raw_fields: HashMap::new() }
    }

    fn add_field(&mut self, name: &str, value: String) {
        self.raw_fields.insert(name.to_string(), value.clone());

        if !COLUMN_FIELDS.contains(&name) {
            if !self.filtered_display.is_empty() {
                self.filtered_display.push_str(", ");
            }
            self.filtered_display.push_str(&format!("{}={}", name, value));
        }
    }
}

struct SpanFieldCollector {
    fields: CustomSpanFields,
}

impl SpanFieldCollector {
    fn new() -> Self {
        Self { fields: CustomSpanFields::new() }
    }
}

impl Visit for SpanFieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted_value = format!("{:?}", value).trim_matches('"').to_string();
        self.fields.add_field(field.name(), formatted_value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.add_field(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.add_field(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.add_field(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.add_field(field.name(), value.to_string());
    }
}

/// Stores every span's fields in its extensions so formatters can read them.
pub struct FieldCollectorLayer;

impl<S> Layer<S> for FieldCollectorLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };

        let mut collector = SpanFieldCollector::new();
        attrs.record(&mut collector);
        span.extensions_mut().insert(collector.fields);
    }

    fn on_record(&self, id: &tracing::span::Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };

        let mut extensions = span.extensions_mut();
        let existing_fields = extensions.remove::<CustomSpanFields>().unwrap_or_else(CustomSpanFields::new);

        let mut collector = SpanFieldCollector::new();
        collector.fields = existing_fields;
        values.record(&mut collector);

        extensions.insert(collector.fields);
    }
}

/// Fields of every span around the event, innermost value wins.
fn scope_fields<S, N>(ctx: &FmtContext<'_, S, N>) -> (HashMap<String, String>, Option<String>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let mut fields = HashMap::new();
    let mut innermost = None;
    if let Some(scope) = ctx.event_scope() {
        for span in scope.from_root() {
            innermost = Some(span.metadata().name().to_string());
            if let Some(custom_fields) = span.extensions().get::<CustomSpanFields>() {
                for (key, value) in &custom_fields.raw_fields {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
    }
    (fields, innermost)
}

// Pretty formatter is formatted for console readability
pub struct PrettyFormatter;

impl<S, N> FormatEvent<S, N> for PrettyFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let meta = event.metadata();
        let now = Utc::now().format("%y-%m-%d %H:%M:%S").to_string();

        let ts_color = "\x1b[96m"; // Bright Cyan
        let level_color = match *meta.level() {
            Level::TRACE => "\x1b[90m",
            Level::DEBUG => "\x1b[34m",
            Level::INFO => "\x1b[32m",
            Level::WARN => "\x1b[33m",
            Level::ERROR => "\x1b[31m",
        };
        let msg_color = "\x1b[97m"; // Bright White
        let column_color = "\x1b[92m"; // Bright Green
        let reset = "\x1b[0m";
        let dim_color = "\x1b[90m";

        let (span_fields, _) = scope_fields(ctx);
        let chain = span_fields.get("chain").map(String::as_str).unwrap_or("-");
        let action = span_fields.get("action").map(String::as_str).unwrap_or("-");

        let mut visitor = FieldExtractor::default();
        event.record(&mut visitor);

        // Timestamp | Level | Chain (16) | Action (18) | Service (10) | Message and fields
        write!(writer, "{}{}{} ", ts_color, now, reset)?;
        write!(writer, "{}|{} ", dim_color, reset)?;
        write!(writer, "{}{:<5}{} ", level_color, *meta.level(), reset)?;
        write!(writer, "{}|{} ", dim_color, reset)?;
        write!(writer, "{}{:<16}{} ", column_color, chain, reset)?;
        write!(writer, "{}|{} ", dim_color, reset)?;
        write!(writer, "{}{:<18}{} ", column_color, action, reset)?;
        write!(writer, "{}|{} ", dim_color, reset)?;
        write!(writer, "{}{:<10}{} ", column_color, extract_service_name(meta.target()), reset)?;
        write!(writer, "{}|{} ", dim_color, reset)?;

        write!(writer, "{}{}{}", msg_color, visitor.message, reset)?;

        if !visitor.meta.is_empty() || !visitor.fields.is_empty() {
            write!(writer, " (")?;
            let mut first = true;

            if !visitor.meta.is_empty() {
                write!(writer, "{}{}{}", msg_color, visitor.meta, reset)?;
                first = false;
            }
            if !visitor.fields.is_empty() {
                if !first {
                    write!(writer, ", ")?;
                }
                write!(writer, "{}{}{}", msg_color, visitor.fields, reset)?;
            }
            write!(writer, ")")?;
        }

        writeln!(writer)
    }
}

// Visitor to extract message and format fields
#[derive(Default)]
struct FieldExtractor {
    message: String,
    fields: String,
    meta: String,
}

impl tracing::field::Visit for FieldExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let fixed_field_color = "\x1b[90m"; // Dark Grey
        let reset = "\x1b[0m";

        if field.name() == "message" {
            self.message = format!("{:?}", value).trim_matches('"').to_string();
        } else if COLUMN_FIELDS.contains(&field.name()) {
            // Already shown in its column when set on a span; event level values still go in the list
            let formatted = format!("{}{}={:?}{}", fixed_field_color, field.name(), value, reset);
            push_field(&mut self.meta, &formatted);
        } else {
            let formatted_value = format!("{:?}", value).trim_matches('"').to_string();
            let formatted_field = format!("{}{}={}{}", fixed_field_color, field.name(), formatted_value, reset);

            // Errors first, they are what an operator scans for
            if field.name() == "error" {
                push_field(&mut self.meta, &formatted_field);
            } else {
                push_field(&mut self.fields, &formatted_field);
            }
        }
    }
}

fn push_field(target: &mut String, formatted: &str) {
    if !target.is_empty() {
        target.push_str(", ");
    }
    target.push_str(formatted);
}

// JSON formatter for structured logs, one object per line
pub struct JsonEventFormatter;

#[derive(Default)]
struct JsonFieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl tracing::field::Visit for JsonFieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let v = format!("{:?}", value);
        let v = v.trim_matches('"').to_string();
        if field.name() == "message" {
            self.message = Some(v);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(v));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonEventFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let meta = event.metadata();
        let ts = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        let mut root = Map::new();
        root.insert("timestamp".to_string(), Value::String(ts));
        root.insert("level".to_string(), Value::String(meta.level().to_string()));
        root.insert("target".to_string(), Value::String(meta.target().to_string()));
        root.insert("service".to_string(), Value::String(extract_service_name(meta.target()).to_string()));
        if let Some(file) = meta.file() {
            root.insert("filename".to_string(), Value::String(file.to_string()));
        }
        if let Some(line) = meta.line() {
            root.insert("line_number".to_string(), Value::from(line));
        }

        if let Some(message) = visitor.message.take() {
            root.insert("message".to_string(), Value::String(message));
        }

        // Span fields first so event fields with the same name win
        let (span_fields, span_name) = scope_fields(ctx);
        let mut all_fields: Map<String, Value> =
            span_fields.into_iter().map(|(key, value)| (key, Value::String(value))).collect();
        if let Some(span_name) = span_name {
            all_fields.insert("span_name".to_string(), Value::String(span_name));
        }
        all_fields.extend(visitor.fields);

        if !all_fields.is_empty() {
            root.insert("fields".to_string(), Value::Object(all_fields));
        }

        let line = serde_json::to_string(&Value::Object(root)).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{}", line)
    }
}

/// Initialize the tracing subscriber with
/// - PrettyFormatter for console readability (when LOG_FORMAT != "json")
/// - JsonEventFormatter for json logging (when LOG_FORMAT = "json")
///
/// This will also install color_eyre to handle the panic in the application
pub fn init_logging() {
    color_eyre::install().expect("Unable to install color_eyre");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(Level::WARN.into())
            .parse("rollout_orchestrator=info")
            .expect("Invalid filter directive and Logger control")
    });

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .event_format(JsonEventFormatter);

        let subscriber = Registry::default()
            .with(env_filter)
            .with(FieldCollectorLayer)
            .with(fmt_layer)
            .with(ErrorLayer::default());
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set global default subscriber");
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .event_format(PrettyFormatter);

        let subscriber = Registry::default()
            .with(env_filter)
            .with(FieldCollectorLayer)
            .with(fmt_layer)
            .with(ErrorLayer::default());
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set global default subscriber");
    }
}

/// Short component name for the service column
fn extract_service_name(target: &str) -> &'static str {
    let Some(path) = target.strip_prefix("rollout_orchestrator") else {
        return "EXTERNAL";
    };
    if path.starts_with("::core::client") {
        "RPC"
    } else if path.starts_with("::core::selector") || path.starts_with("::core::deployments") {
        "SELECTOR"
    } else if path.starts_with("::core::build_profile") {
        "PROFILE"
    } else if path.starts_with("::core::tracking") {
        "LEDGER"
    } else if path.starts_with("::worker") {
        "EXECUTOR"
    } else {
        "-"
    }
}
