//! Argument routing: turns an argument vector into a textual reply.
//!
//! The same grammar serves two callers: the process's own command line
//! ([`ParseMode::Strict`], where a bad argument is a usage error) and
//! requests forwarded by later invocations ([`ParseMode::Lenient`], where a
//! bad argument is answered with the help text and nothing else happens).
//!
//! As with any `argv`, a leading program name is skipped. A vector that
//! starts with an option has no program name, so `["--version"]` and
//! `["solo", "--version"]` route the same way.

use std::ffi::OsString;

use clap::{CommandFactory, Parser};
use tracing::{debug, info, warn};

use crate::build_info::{APP_NAME, version_string};
use crate::logging::LogControl;

/// Options recognised on the command line and in forwarded requests.
#[derive(Debug, Parser)]
#[command(
    name = APP_NAME,
    about = "Single-instance launcher: later invocations forward their arguments to the resident instance.",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct ParsedOptions {
    /// Print help.
    #[arg(short = 'h', long)]
    pub help: bool,

    /// Print version information.
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Log message pattern, e.g. "[%{time}] %{type} %{message}".
    /// Consecutive words are joined with single spaces.
    #[arg(long, value_name = "PATTERN", num_args = 1..)]
    pub message_pattern: Option<Vec<String>>,

    /// Log filter rules, e.g. "info,solo_core::ticker=off" or "noisy=false".
    #[arg(long, value_name = "RULES")]
    pub logging_rules: Option<String>,

    /// Ask the resident instance to shut down.
    #[arg(long)]
    pub quit: bool,

    /// Files or other operands. Accepted and ignored.
    #[arg(value_name = "ARGS")]
    pub operands: Vec<String>,
}

/// How parse failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// The process's own arguments: failure is a usage error.
    Strict,
    /// A forwarded request: failure yields the help text.
    Lenient,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Usage(#[from] clap::Error),
}

/// Outcome of routing one argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Help(String),
    Version(String),
    /// Confirmation lines for every applied option.
    Applied { lines: Vec<String>, quit: bool },
}

impl Reply {
    /// The text sent back to a forwarding peer.
    pub fn text(&self) -> String {
        match self {
            Reply::Help(text) | Reply::Version(text) => text.clone(),
            Reply::Applied { lines, .. } => lines.join("\n"),
        }
    }

    pub fn quit_requested(&self) -> bool {
        matches!(self, Reply::Applied { quit: true, .. })
    }
}

/// Usage text for the option grammar.
pub fn help_text() -> String {
    ParsedOptions::command().render_help().to_string()
}

/// Applies routed options to this process's logging state.
#[derive(Debug, Clone)]
pub struct Router {
    log: LogControl,
}

impl Router {
    pub fn new(log: LogControl) -> Self {
        Self { log }
    }

    pub fn log_control(&self) -> &LogControl {
        &self.log
    }

    /// Route an argument vector, with or without a leading program name.
    ///
    /// In [`ParseMode::Lenient`] this never returns an error.
    pub fn process<I, T>(&self, tokens: I, mode: ParseMode) -> Result<Reply, RouteError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut argv: Vec<OsString> = tokens.into_iter().map(Into::into).collect();
        if argv
            .first()
            .is_none_or(|first| first.to_string_lossy().starts_with('-'))
        {
            argv.insert(0, OsString::from(APP_NAME));
        }

        let options = match ParsedOptions::try_parse_from(argv) {
            Ok(options) => options,
            Err(err) if mode == ParseMode::Strict => return Err(err.into()),
            Err(err) => {
                debug!(kind = ?err.kind(), "Forwarded arguments rejected, answering with help");
                return Ok(Reply::Help(help_text()));
            }
        };

        if options.help {
            return Ok(Reply::Help(help_text()));
        }
        if options.version {
            return Ok(Reply::Version(version_string()));
        }
        if !options.operands.is_empty() {
            debug!(operands = ?options.operands, "Ignoring operands");
        }

        let mut lines = Vec::new();

        if let Some(words) = options.message_pattern {
            let pattern = words.join(" ");
            info!(%pattern, "Set message pattern");
            self.log.set_message_pattern(&pattern);
            lines.push(format!("Message pattern is set :{pattern}"));
        }

        if let Some(rules) = options.logging_rules {
            info!(%rules, "Set logging rules");
            match self.log.set_filter_rules(&rules) {
                Ok(()) => lines.push(format!("Logging rules is set :{rules}")),
                Err(e) => {
                    warn!(%rules, error = %e, "Logging rules rejected");
                    lines.push(format!("Logging rules rejected :{rules} ({e})"));
                }
            }
        }

        if options.quit {
            info!("Shutdown requested");
            lines.push("Shutdown requested".to_string());
        }

        Ok(Reply::Applied {
            lines,
            quit: options.quit,
        })
    }

    /// Route a raw forwarded request: UTF-8 (lossy) text split on single spaces.
    pub fn process_line(&self, request: &[u8]) -> Reply {
        let text = String::from_utf8_lossy(request);
        let line = text.trim_end_matches(['\r', '\n']);
        match self.process(line.split(' '), ParseMode::Lenient) {
            Ok(reply) => reply,
            Err(_) => Reply::Help(help_text()),
        }
    }
}
