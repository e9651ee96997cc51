//! Help text derived from the live command registry.
//!
//! The listing, the detail view and the reactive responder all go through
//! [`render_entry`], so what users read never drifts from what is registered.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    command::{CommandDescriptor, CommandRegistry, HelpEntry, Outcome},
    dispatcher::Context,
    Result,
};

/// A listing line (`menu - summary`) or, with `detailed`, the full block.
pub fn render_entry(entry: &HelpEntry, detailed: bool) -> String {
    let mut out = if entry.summary.is_empty() {
        entry.menu.clone()
    } else {
        format!("{} - {}", entry.menu, entry.summary)
    };
    if detailed {
        for extra in [&entry.usage, &entry.detail] {
            if !extra.is_empty() {
                out.push('\n');
                out.push_str(extra);
            }
        }
    }
    out
}

/// One line per documented command visible to the caller, sorted by menu name.
pub fn listing(registry: &CommandRegistry, is_master: bool) -> String {
    let mut entries: BTreeMap<&str, &HelpEntry> = BTreeMap::new();
    for desc in registry.iter() {
        if desc.master_only && !is_master {
            continue;
        }
        if let Some(help) = &desc.help {
            entries.entry(help.menu.as_str()).or_insert(help);
        }
    }
    entries
        .values()
        .map(|h| format!("\n{}", render_entry(h, false)))
        .collect()
}

/// Detail view for `name`, matched against command names and menu names.
pub fn detail(registry: &CommandRegistry, name: &str) -> Option<String> {
    registry
        .iter()
        .filter(|d| d.has_name(name) || d.help.as_ref().is_some_and(|h| h.menu == name))
        .find_map(|d| d.help.as_ref())
        .map(|h| render_entry(h, true))
}

/// `help` and `help <name>`.
pub async fn help_command(ctx: Arc<Context>) -> Result<Outcome> {
    let words = ctx.words();
    let text = match ctx.args() {
        [_] => {
            let me = &ctx.conn.me;
            let name = if me.nickname.is_empty() {
                &me.username
            } else {
                &me.nickname
            };
            ctx.render(
                &words.self_intro,
                name,
                &listing(ctx.bm.registry(), ctx.is_master),
            )
        }
        [_, name] => {
            let name = strip_prefix(name, &ctx.bm.config().command_prefixes);
            detail(ctx.bm.registry(), name)
                .unwrap_or_else(|| ctx.render(&words.no_help_text, name, ""))
        }
        _ => return Ok(Outcome::NotHandled),
    };
    ctx.reply_text(text).await?;
    Ok(Outcome::Handled)
}

/// Catch-all at the bottom of the registry: explains why a command did not run.
pub async fn help_responder(ctx: Arc<Context>) -> Result<Outcome> {
    let command = ctx.command();
    if command.is_empty() {
        return Ok(Outcome::NotHandled);
    }

    let words = ctx.words();
    let named = ctx.bm.registry().named(command);
    let text = if named.is_empty() {
        ctx.render(&words.undefined_command, command, "")
    } else if !ctx.is_master && named.iter().all(|d| d.master_only) {
        ctx.render(&words.no_permission, command, "")
    } else {
        first_help(&named)
            .map(|h| render_entry(h, true))
            .unwrap_or_else(|| ctx.render(&words.no_help_text, command, ""))
    };

    ctx.reply_text(text).await?;
    Ok(Outcome::Handled)
}

fn first_help(descs: &[Arc<CommandDescriptor>]) -> Option<&HelpEntry> {
    descs.iter().find_map(|d| d.help.as_ref())
}

fn strip_prefix<'a>(name: &'a str, prefixes: &[String]) -> &'a str {
    prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| name.strip_prefix(p.as_str()))
        .unwrap_or(name)
}
