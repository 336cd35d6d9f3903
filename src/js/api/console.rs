// Console binding - routes guest console output to tracing

use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function, Object, Value};
use std::rc::Rc;

/// Tracing target of every guest log line
pub const GUEST_TARGET: &str = "guest";

#[derive(Clone, Copy, Debug)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Render console arguments the way a browser console prints them, space separated
///
/// Strings are printed raw, plain objects and arrays as JSON, everything else
/// through its `toString`.
pub fn format_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> String {
    args.iter()
        .map(|value| format_value(ctx, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    if value.is_object() && !value.is_function() && !value.is_error() {
        if let Ok(Some(json)) = ctx.json_stringify(value.clone()) {
            if let Ok(json) = json.to_string() {
                return json;
            }
        }
    }
    value
        .get::<Coerced<String>>()
        .map(|text| text.0)
        .unwrap_or_else(|_| format!("[{}]", value.type_name()))
}

fn emit(level: Level, context: &str, line: &str) {
    match level {
        Level::Debug => tracing::debug!(target: GUEST_TARGET, context, "{}", line),
        Level::Info => tracing::info!(target: GUEST_TARGET, context, "{}", line),
        Level::Warn => tracing::warn!(target: GUEST_TARGET, context, "{}", line),
        Level::Error => tracing::error!(target: GUEST_TARGET, context, "{}", line),
    }
}

/// Install `console` into the context labelled `label`
pub fn install<'js>(ctx: &Ctx<'js>, label: &str) -> rquickjs::Result<()> {
    let label: Rc<str> = Rc::from(label);
    let console = Object::new(ctx.clone())?;

    let methods = [
        ("log", Level::Info),
        ("info", Level::Info),
        ("debug", Level::Debug),
        ("trace", Level::Debug),
        ("warn", Level::Warn),
        ("error", Level::Error),
    ];
    for (name, level) in methods {
        let label = label.clone();
        let method = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            emit(level, &label, &format_args(&ctx, &args.0));
        })?
        .with_name(name)?;
        console.set(name, method)?;
    }

    ctx.globals().set("console", console)
}
