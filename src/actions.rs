// Basic DOM actions
// A small command vocabulary for the CLI and for exercising chains

//! Registers a handful of general-purpose commands on an engine:
//!
//! | Command                   | Effect on every current target           |
//! |---------------------------|------------------------------------------|
//! | `--text:set:<value>`      | replace the text content                 |
//! | `--text:append:<value>`   | append to the text content               |
//! | `--class:add:<name>`      | add a class                              |
//! | `--class:remove:<name>`   | remove a class                           |
//! | `--class:toggle:<name>`   | toggle a class                           |
//! | `--attr:set:<name>:<val>` | set an attribute                         |
//! | `--attr:remove:<name>`    | remove an attribute                      |
//! | `--fail[:<message>]`      | always fails; handy for error chains     |

use anyhow::{anyhow, bail};

use crate::engine::{CommandContext, CommandEngine};
use crate::models::PARAM_DELIMITER;

pub fn register_basic_actions(engine: &CommandEngine) {
    engine.register_fn("--text:set", text_set);
    engine.register_fn("--text:append", text_append);
    engine.register_fn("--class:add", |ctx| {
        let class = required(ctx, 0, "class name")?;
        for target in ctx.targets() {
            ctx.document().add_class(target, class)?;
        }
        Ok(())
    });
    engine.register_fn("--class:remove", |ctx| {
        let class = required(ctx, 0, "class name")?;
        for target in ctx.targets() {
            ctx.document().remove_class(target, class)?;
        }
        Ok(())
    });
    engine.register_fn("--class:toggle", |ctx| {
        let class = required(ctx, 0, "class name")?;
        for target in ctx.targets() {
            ctx.document().toggle_class(target, class)?;
        }
        Ok(())
    });
    engine.register_fn("--attr:set", attr_set);
    engine.register_fn("--attr:remove", |ctx| {
        let name = required(ctx, 0, "attribute name")?;
        for target in ctx.targets() {
            ctx.document().remove_attribute(target, name)?;
        }
        Ok(())
    });
    engine.register_fn("--fail", |ctx| {
        let message = rest(ctx, 0);
        if message.is_empty() {
            bail!("{} failed on purpose", ctx.name());
        }
        Err(anyhow!(message))
    });
}

fn text_set(ctx: &CommandContext) -> anyhow::Result<()> {
    let text = rest(ctx, 0);
    for target in ctx.targets() {
        ctx.document().set_text_content(target, &text)?;
    }
    Ok(())
}

fn text_append(ctx: &CommandContext) -> anyhow::Result<()> {
    let text = rest(ctx, 0);
    for target in ctx.targets() {
        let current = ctx.document().text_content(target).unwrap_or_default();
        ctx.document()
            .set_text_content(target, &format!("{current}{text}"))?;
    }
    Ok(())
}

fn attr_set(ctx: &CommandContext) -> anyhow::Result<()> {
    let name = required(ctx, 0, "attribute name")?;
    let value = rest(ctx, 1);
    for target in ctx.targets() {
        ctx.document().set_attribute(target, name, &value)?;
    }
    Ok(())
}

fn required<'a>(ctx: &'a CommandContext, index: usize, what: &str) -> anyhow::Result<&'a str> {
    match ctx.param(index).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("{} needs a {what} parameter", ctx.name()),
    }
}

/// Parameters from `index` on, rejoined so values may contain the delimiter
fn rest(ctx: &CommandContext, index: usize) -> String {
    ctx.params()
        .get(index..)
        .map(|params| params.join(&PARAM_DELIMITER.to_string()))
        .unwrap_or_default()
}
