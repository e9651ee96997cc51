//! Command descriptors, the priority-ordered registry and command extraction.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{dispatcher::Context, Result};

/// Result of running one handler against an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Processing stops here.
    Handled,
    /// Fall through to the next matching descriptor.
    NotHandled,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: Arc<Context>) -> Result<Outcome>;
}

/// Adapts an async closure into a [`CommandHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    async fn handle(&self, ctx: Arc<Context>) -> Result<Outcome> {
        (self.0)(ctx).await
    }
}

/// Help metadata attached to a descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HelpEntry {
    /// Name shown in the listing.
    pub menu: String,
    /// One line for the listing.
    pub summary: String,
    pub usage: String,
    /// Longer text for `help <name>`.
    pub detail: String,
}

impl HelpEntry {
    pub fn new(menu: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            menu: menu.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Registered metadata plus handler for one command.
pub struct CommandDescriptor {
    /// Registration key; registering the same id again replaces the entry in place.
    pub id: String,
    /// Empty means "no name filter": the descriptor sees every update.
    pub names: Vec<String>,
    pub priority: i32,
    pub master_only: bool,
    /// Bounds on the token count (command token included); 0 means unbounded.
    pub min_args: usize,
    pub max_args: usize,
    pub help: Option<HelpEntry>,
    handler: Arc<dyn CommandHandler>,
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("id", &self.id)
            .field("names", &self.names)
            .field("priority", &self.priority)
            .field("master_only", &self.master_only)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish_non_exhaustive()
    }
}

impl CommandDescriptor {
    pub fn new(id: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            id: id.into(),
            names: Vec::new(),
            priority: 0,
            master_only: false,
            min_args: 0,
            max_args: 0,
            help: None,
            handler: Arc::new(handler),
        }
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn master_only(mut self) -> Self {
        self.master_only = true;
        self
    }

    pub fn args(mut self, min: usize, max: usize) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn help(mut self, help: HelpEntry) -> Self {
        self.help = Some(help);
        self
    }

    pub fn handler(&self) -> &Arc<dyn CommandHandler> {
        &self.handler
    }

    pub fn has_name(&self, word: &str) -> bool {
        self.names.iter().any(|n| n == word)
    }

    /// Name filter: nameless descriptors match any word, named ones need an exact hit.
    pub fn matches_word(&self, word: &str) -> bool {
        self.names.is_empty() || (!word.is_empty() && self.has_name(word))
    }

    pub fn accepts_arg_count(&self, n: usize) -> bool {
        if self.min_args != 0 && n < self.min_args {
            return false;
        }
        if self.max_args != 0 && n > self.max_args {
            return false;
        }
        true
    }
}

struct Entry {
    seq: u64,
    desc: Arc<CommandDescriptor>,
}

/// Priority-ordered command table (priority desc, registration order asc).
#[derive(Default)]
pub struct CommandRegistry {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, desc: CommandDescriptor) {
        let desc = Arc::new(desc);
        if let Some(existing) = self.entries.iter_mut().find(|e| e.desc.id == desc.id) {
            existing.desc = desc;
        } else {
            self.entries.push(Entry {
                seq: self.next_seq,
                desc,
            });
            self.next_seq += 1;
        }

        // `sort_by` is stable; the seq tie-break keeps replaced entries in their slot.
        self.entries.sort_by(|a, b| {
            b.desc
                .priority
                .cmp(&a.desc.priority)
                .then(a.seq.cmp(&b.seq))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CommandDescriptor>> {
        self.entries.iter().map(|e| &e.desc)
    }

    /// Candidates for one update, in the order the dispatcher must try them.
    pub fn matching(
        &self,
        word: &str,
        is_master: bool,
        arg_count: usize,
    ) -> Vec<Arc<CommandDescriptor>> {
        self.iter()
            .filter(|d| is_master || !d.master_only)
            .filter(|d| d.matches_word(word))
            .filter(|d| d.accepts_arg_count(arg_count))
            .cloned()
            .collect()
    }

    /// Every descriptor that carries `word` as a name, ignoring authorization and arity.
    pub fn named(&self, word: &str) -> Vec<Arc<CommandDescriptor>> {
        if word.is_empty() {
            return Vec::new();
        }
        self.iter().filter(|d| d.has_name(word)).cloned().collect()
    }
}

/// Derive the command word from the first token of a message.
///
/// A trailing self-mention (`/ban@BotName`) is stripped first, trying the longest
/// spelling first, then one of `prefixes` must lead the remainder. Returns an empty
/// string when the token is not a command.
pub fn extract_command(first_token: &str, mentions: &[String], prefixes: &[String]) -> String {
    let mut mentions: Vec<&str> = mentions
        .iter()
        .map(String::as_str)
        .filter(|m| !m.is_empty())
        .collect();
    mentions.sort_by_key(|m| std::cmp::Reverse(m.len()));

    let mut s = first_token;
    for m in mentions {
        if let Some(rest) = s.strip_suffix(m) {
            if !rest.is_empty() {
                s = rest;
                break;
            }
        }
    }

    let mut prefixes: Vec<&str> = prefixes
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));

    for p in prefixes {
        if let Some(rest) = s.strip_prefix(p) {
            return rest.to_string();
        }
    }

    String::new()
}
