//! Process-wide logging state that forwarded requests can reconfigure.
//!
//! [`init`] installs a `tracing` subscriber made of a reloadable
//! [`EnvFilter`] and a `fmt` layer whose lines are shaped by a
//! [`MessagePattern`]. The returned [`LogControl`] is the only way to change
//! either afterwards; the router owns it.
//!
//! Pattern placeholders:
//!
//! | Placeholder   | Expands to                      |
//! |---------------|---------------------------------|
//! | `%{time}`     | wall-clock time (RFC 3339)      |
//! | `%{type}`     | level (`INFO`, `WARN`, ...)     |
//! | `%{category}` | event target                    |
//! | `%{message}`  | message and structured fields   |
//! | `%{pid}`      | process id                      |
//! | `%{appname}`  | application name                |
//! | `%{file}`     | source file                     |
//! | `%{line}`     | source line                     |
//! | `%{threadid}` | current thread id               |
//!
//! Anything else is written verbatim.

use std::sync::{Arc, PoisonError, RwLock};

use solo_config::LoggingConfig;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::build_info::APP_NAME;

/// Errors from building or reconfiguring the logging stack.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("logging rules must not be empty")]
    EmptyRules,

    #[error("invalid logging rules {rules:?}: {source}")]
    InvalidRules {
        rules: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),

    #[error("failed to install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Time,
    Type,
    Category,
    Message,
    Pid,
    AppName,
    File,
    Line,
    ThreadId,
}

impl Segment {
    fn placeholder(key: &str) -> Option<Self> {
        Some(match key {
            "time" => Self::Time,
            "type" => Self::Type,
            "category" => Self::Category,
            "message" => Self::Message,
            "pid" => Self::Pid,
            "appname" => Self::AppName,
            "file" => Self::File,
            "line" => Self::Line,
            "threadid" => Self::ThreadId,
            _ => return None,
        })
    }
}

/// A parsed log line template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePattern {
    source: String,
    segments: Vec<Segment>,
}

impl MessagePattern {
    /// Parse a pattern. Never fails: unknown or unterminated placeholders
    /// are kept as literal text.
    pub fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;

        while let Some(start) = rest.find("%{") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                literal.push_str(&rest[start..]);
                rest = "";
                break;
            };
            match Segment::placeholder(&after[..end]) {
                Some(segment) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                None => literal.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: pattern.to_string(),
            segments,
        }
    }

    /// The pattern text as it was set.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// `fmt` event formatter driven by the current [`MessagePattern`].
#[derive(Debug, Clone)]
pub struct PatternFormatter {
    pattern: Arc<RwLock<MessagePattern>>,
    timer: SystemTime,
}

impl<S, N> FormatEvent<S, N> for PatternFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let pattern = self.pattern.read().unwrap_or_else(PoisonError::into_inner);
        let meta = event.metadata();

        for segment in &pattern.segments {
            match segment {
                Segment::Literal(text) => writer.write_str(text)?,
                Segment::Time => self.timer.format_time(&mut writer)?,
                Segment::Type => write!(writer, "{}", meta.level())?,
                Segment::Category => writer.write_str(meta.target())?,
                Segment::Message => ctx.field_format().format_fields(writer.by_ref(), event)?,
                Segment::Pid => write!(writer, "{}", std::process::id())?,
                Segment::AppName => writer.write_str(APP_NAME)?,
                Segment::File => writer.write_str(meta.file().unwrap_or("?"))?,
                Segment::Line => write!(writer, "{}", meta.line().unwrap_or(0))?,
                Segment::ThreadId => write!(writer, "{:?}", std::thread::current().id())?,
            }
        }
        writeln!(writer)
    }
}

/// Handle for changing the message pattern and filter rules at runtime.
#[derive(Clone)]
pub struct LogControl {
    pattern: Arc<RwLock<MessagePattern>>,
    rules: Arc<RwLock<String>>,
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    /// Replace the active message pattern.
    pub fn set_message_pattern(&self, pattern: &str) {
        let parsed = MessagePattern::parse(pattern);
        *self.pattern.write().unwrap_or_else(PoisonError::into_inner) = parsed;
    }

    /// Replace the active filter rules. On error the previous rules stay in effect.
    pub fn set_filter_rules(&self, rules: &str) -> Result<(), LoggingError> {
        let filter = parse_rules(rules)?;
        self.filter.reload(filter)?;
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules.to_string();
        Ok(())
    }

    pub fn message_pattern(&self) -> String {
        self.pattern
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_str()
            .to_string()
    }

    pub fn filter_rules(&self) -> String {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("pattern", &self.message_pattern())
            .field("rules", &self.filter_rules())
            .finish()
    }
}

fn parse_rules(rules: &str) -> Result<EnvFilter, LoggingError> {
    let directives = filter_directives(rules);
    if directives.is_empty() {
        return Err(LoggingError::EmptyRules);
    }
    EnvFilter::try_new(&directives).map_err(|source| LoggingError::InvalidRules {
        rules: rules.to_string(),
        source,
    })
}

/// Rewrite rules into `EnvFilter` directives.
///
/// Besides plain `EnvFilter` syntax, `category=true` enables every level of
/// a target and `category=false` silences it; `*` names all targets.
/// Directives may be separated by `,`, `;` or newlines.
fn filter_directives(rules: &str) -> String {
    rules
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| match directive.rsplit_once('=') {
            Some((target, "true")) => level_directive(target, "trace"),
            Some((target, "false")) => level_directive(target, "off"),
            _ => directive.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn level_directive(target: &str, level: &str) -> String {
    match target.trim() {
        "" | "*" => level.to_string(),
        target => format!("{target}={level}"),
    }
}

/// Build the subscriber stack without installing it.
///
/// `make_writer` receives every formatted line; [`init`] passes stderr so
/// that stdout stays reserved for replies, help, and version text.
pub fn build<W>(
    config: &LoggingConfig,
    make_writer: W,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogControl), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter_layer, filter) = reload::Layer::new(parse_rules(&config.rules)?);
    let pattern = Arc::new(RwLock::new(MessagePattern::parse(&config.message_pattern)));

    let formatter = PatternFormatter {
        pattern: Arc::clone(&pattern),
        timer: SystemTime,
    };
    let subscriber = tracing_subscriber::registry().with(filter_layer).with(
        tracing_subscriber::fmt::layer()
            .event_format(formatter)
            .with_writer(make_writer),
    );

    let control = LogControl {
        pattern,
        rules: Arc::new(RwLock::new(config.rules.clone())),
        filter,
    };
    Ok((subscriber, control))
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces
/// `config.rules` as the initial filter.
pub fn init(config: &LoggingConfig) -> Result<LogControl, LoggingError> {
    let mut config = config.clone();
    if let Some(env_rules) = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|rules| !rules.trim().is_empty())
    {
        config.rules = env_rules;
    }

    let (subscriber, control) = build(&config, std::io::stderr)?;
    subscriber.try_init()?;
    Ok(control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use solo_test_utils::tracing_setup::CapturedWriter;

    fn config(rules: &str, pattern: &str) -> LoggingConfig {
        LoggingConfig {
            rules: rules.to_string(),
            message_pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_pattern_splits_placeholders_and_literals() {
        let pattern = MessagePattern::parse("[%{time}] %{message}");
        assert_eq!(
            pattern.segments,
            vec![
                Segment::Literal("[".into()),
                Segment::Time,
                Segment::Literal("] ".into()),
                Segment::Message,
            ]
        );
        assert_eq!(pattern.as_str(), "[%{time}] %{message}");
    }

    #[test]
    fn test_pattern_keeps_unknown_and_unterminated_text() {
        let pattern = MessagePattern::parse("%{bogus}-%{message");
        assert_eq!(
            pattern.segments,
            vec![Segment::Literal("%{bogus}-%{message".into())]
        );
    }

    #[test]
    fn test_lines_follow_the_current_pattern() {
        let writer = CapturedWriter::default();
        let (subscriber, control) =
            build(&config("info", "%{type}|%{message}"), writer.clone()).unwrap();
        let _guard = subscriber.set_default();

        tracing::info!("first");
        control.set_message_pattern("<%{category}> %{message}");
        tracing::info!(target: "demo", "second");

        assert_eq!(writer.lines(), vec!["INFO|first", "<demo> second"]);
    }

    #[test]
    fn test_filter_rules_reload() {
        let writer = CapturedWriter::default();
        let (subscriber, control) = build(&config("info", "%{message}"), writer.clone()).unwrap();
        let _guard = subscriber.set_default();

        tracing::debug!("hidden");
        control.set_filter_rules("debug").unwrap();
        tracing::debug!("shown");

        assert_eq!(writer.lines(), vec!["shown"]);
        assert_eq!(control.filter_rules(), "debug");
    }

    #[test]
    fn test_invalid_rules_leave_state_untouched() {
        let (subscriber, control) =
            build(&config("info", "%{message}"), CapturedWriter::default()).unwrap();
        let _guard = subscriber.set_default();

        let err = control.set_filter_rules("foo=notalevel").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidRules { .. }));
        assert!(matches!(
            control.set_filter_rules("  "),
            Err(LoggingError::EmptyRules)
        ));
        assert_eq!(control.filter_rules(), "info");
    }

    #[test]
    fn test_boolean_rules_map_to_levels() {
        assert_eq!(filter_directives("x=true"), "x=trace");
        assert_eq!(filter_directives("*=false; demo=true"), "off,demo=trace");
        assert_eq!(filter_directives("info,solo_core=debug"), "info,solo_core=debug");
        assert_eq!(filter_directives(" ;\n"), "");
    }

    #[test]
    fn test_boolean_rules_filter_events() {
        let writer = CapturedWriter::default();
        let (subscriber, control) = build(&config("info", "%{message}"), writer.clone()).unwrap();
        let _guard = subscriber.set_default();

        control.set_filter_rules("info;noisy=false").unwrap();
        tracing::info!(target: "noisy", "dropped");
        tracing::info!(target: "quiet", "kept");

        assert_eq!(writer.lines(), vec!["kept"]);
        assert_eq!(control.filter_rules(), "info;noisy=false");
    }

    #[test]
    fn test_build_rejects_bad_initial_rules() {
        let result = build(&config("x=nope", "%{message}"), CapturedWriter::default());
        assert!(result.is_err());
    }
}
