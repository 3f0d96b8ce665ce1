//! Tracing setup and the log bridge into research event streams.
//!
//! [`EventLogLayer`] forwards log records emitted inside a span (or event)
//! carrying a `research_id` field to that run's [`EventStream`] as system
//! `log` events. Streams are attached with [`attach`] for the lifetime of
//! the returned guard. Forwarding is best-effort: an unknown or dropped
//! stream just means the record is not forwarded.

use crate::research::events::{EventPayload, EventStream};
use crate::utils::toml_config::LoggingConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

type Sinks = RwLock<HashMap<String, Weak<EventStream>>>;

fn sinks() -> &'static Sinks {
    static SINKS: OnceLock<Sinks> = OnceLock::new();
    SINKS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Detaches the stream from the log bridge when dropped.
pub struct StreamGuard {
    research_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        sinks().write().remove(&self.research_id);
    }
}

/// Forward `research_id`-scoped log records to `stream` until the guard drops.
pub fn attach(stream: &Arc<EventStream>) -> StreamGuard {
    let research_id = stream.research_id().to_string();
    sinks()
        .write()
        .insert(research_id.clone(), Arc::downgrade(stream));
    StreamGuard { research_id }
}

struct ResearchId(String);

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    research_id: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "research_id" => self.research_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            "research_id" => self.research_id = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}

/// `tracing_subscriber` layer feeding run-scoped logs into event streams.
pub struct EventLogLayer {
    max_level: Level,
}

impl Default for EventLogLayer {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl EventLogLayer {
    /// Forward records at `max_level` and more severe.
    pub fn new(max_level: Level) -> Self {
        Self { max_level }
    }
}

impl<S> Layer<S> for EventLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(research_id), Some(span)) = (visitor.research_id, ctx.span(id)) {
            span.extensions_mut().insert(ResearchId(research_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let research_id = visitor.research_id.or_else(|| {
            ctx.event_scope(event).and_then(|scope| {
                scope
                    .from_root()
                    .find_map(|span| span.extensions().get::<ResearchId>().map(|r| r.0.clone()))
            })
        });
        let Some(research_id) = research_id else {
            return;
        };

        let stream = sinks().read().get(&research_id).and_then(Weak::upgrade);
        if let Some(stream) = stream {
            stream.publish(EventPayload::Log {
                level: metadata.level().to_string().to_lowercase(),
                module: metadata.target().to_string(),
                message: visitor.message.unwrap_or_default(),
            });
        }
    }
}

/// Install the global subscriber: env filter, console or JSON output, and
/// the event-stream bridge. `RUST_LOG` overrides `[logging].level`.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> crate::types::Result<()> {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::types::AppError::Configuration(format!("Invalid log level: {}", e)))?;

    let json = config.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
        }))
        .with(EventLogLayer::default())
        .try_init()
        .map_err(|e| crate::types::AppError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
