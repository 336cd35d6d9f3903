// Guest-facing bindings installed into every execution context

pub mod console;
pub mod scope;
pub mod worker;

pub use scope::WorkerScope;

use crate::js::runtime::ContextState;
use rquickjs::Ctx;
use std::rc::Rc;

/// Install `console` and the `Worker` class
///
/// Worker contexts additionally get [`scope::install`].
pub fn install<'js>(ctx: &Ctx<'js>, state: Rc<ContextState>) -> rquickjs::Result<()> {
    console::install(ctx, state.label())?;
    worker::install(ctx, state)
}
