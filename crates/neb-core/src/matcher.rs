//! Command and expansion matching for inbound room messages.
//!
//! - A message is a command iff it starts with [`COMMAND_PREFIX`].
//! - Command arguments are split shell-style; smart quotes count as straight quotes.
//! - The registered command with the longest matching path wins; ties go to the
//!   first one registered.
//! - Expansions run on every other message, once per distinct matched substring.

use std::{collections::HashSet, fmt, future::Future, pin::Pin, sync::Arc};

use regex::Regex;

use crate::domain::{Content, RoomId, UserId};

pub const COMMAND_PREFIX: char = '!';

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<Content>>> + Send>>;

type CommandFn = dyn Fn(CommandContext) -> HandlerFuture + Send + Sync;
type ExpansionFn = dyn Fn(&RoomId, &UserId, &[String]) -> Option<Content> + Send + Sync;

/// What a command handler gets to see.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub room_id: RoomId,
    pub sender: UserId,
    /// Tokens left after the command path.
    pub args: Vec<String>,
}

/// A path-matched command, e.g. `["issues", "link"]` for `!issues link ...`.
#[derive(Clone)]
pub struct Command {
    pub path: Vec<String>,
    pub help: Option<String>,
    handler: Arc<CommandFn>,
}

impl Command {
    pub fn new<P, S, F, Fut>(path: P, handler: F) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Content>>> + Send + 'static,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            help: None,
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Case-insensitive prefix test of the path against `args`.
    pub fn matches(&self, args: &[String]) -> bool {
        !self.path.is_empty()
            && self.path.len() <= args.len()
            && self
                .path
                .iter()
                .zip(args)
                .all(|(p, a)| p.to_lowercase() == a.to_lowercase())
    }

    pub async fn run(&self, ctx: CommandContext) -> anyhow::Result<Option<Content>> {
        (self.handler)(ctx).await
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("help", &self.help)
            .finish_non_exhaustive()
    }
}

/// A regex-triggered auto-response.
#[derive(Clone)]
pub struct Expansion {
    pub pattern: Regex,
    handler: Arc<ExpansionFn>,
}

impl Expansion {
    /// `handler` receives the whole match at index 0 followed by the capture groups
    /// (non-participating groups as empty strings).
    pub fn new<F>(pattern: Regex, handler: F) -> Self
    where
        F: Fn(&RoomId, &UserId, &[String]) -> Option<Content> + Send + Sync + 'static,
    {
        Self {
            pattern,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for Expansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expansion")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

pub fn is_command(body: &str) -> bool {
    body.starts_with(COMMAND_PREFIX)
}

/// Replace typographic quotes with their ASCII counterparts.
pub fn normalize_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect()
}

/// Tokenize a command body (prefix included). Falls back to whitespace splitting
/// when the quotes do not balance so the message is never dropped.
pub fn command_args(body: &str) -> Vec<String> {
    let rest = body.strip_prefix(COMMAND_PREFIX).unwrap_or(body);
    let normalized = normalize_quotes(rest);
    shell_words::split(&normalized).unwrap_or_else(|_| {
        normalized
            .split_whitespace()
            .map(str::to_string)
            .collect()
    })
}

/// Pick the command with the longest path matching `args`. Earlier entries win ties.
pub fn find_command<'a>(commands: &'a [Command], args: &[String]) -> Option<&'a Command> {
    let mut best: Option<&Command> = None;
    for cmd in commands {
        if !cmd.matches(args) {
            continue;
        }
        if best.map_or(true, |b| cmd.path.len() > b.path.len()) {
            best = Some(cmd);
        }
    }
    best
}

/// Result of running a matched command.
#[derive(Debug)]
pub struct CommandOutcome {
    pub path: Vec<String>,
    pub content: Option<Content>,
    pub failed: bool,
}

/// Match `body` against `commands` and run the winner.
///
/// A handler error is reported as a notice carrying the error text.
pub async fn match_commands(
    commands: &[Command],
    room_id: &RoomId,
    sender: &UserId,
    body: &str,
) -> Option<CommandOutcome> {
    if !is_command(body) {
        return None;
    }
    let args = command_args(body);
    let cmd = find_command(commands, &args)?;

    let ctx = CommandContext {
        room_id: room_id.clone(),
        sender: sender.clone(),
        args: args[cmd.path.len()..].to_vec(),
    };
    let outcome = match cmd.run(ctx).await {
        Ok(content) => CommandOutcome {
            path: cmd.path.clone(),
            content,
            failed: false,
        },
        Err(e) => CommandOutcome {
            path: cmd.path.clone(),
            content: Some(Content::notice(e.to_string())),
            failed: true,
        },
    };
    Some(outcome)
}

/// Run every expansion over `body`, in order, returning the produced responses.
pub fn match_expansions(
    expansions: &[Expansion],
    room_id: &RoomId,
    sender: &UserId,
    body: &str,
) -> Vec<Content> {
    let mut out = Vec::new();
    if is_command(body) {
        return out;
    }

    for expansion in expansions {
        let mut seen: HashSet<&str> = HashSet::new();
        for caps in expansion.pattern.captures_iter(body) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if !seen.insert(whole.as_str()) {
                continue;
            }
            let groups: Vec<String> = caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            if let Some(content) = (expansion.handler)(room_id, sender, &groups) {
                out.push(content);
            }
        }
    }
    out
}
