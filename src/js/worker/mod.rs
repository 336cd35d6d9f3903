// Worker subsystem - isolated execution contexts on their own threads
//
// Everything here is independent of the guest engine: messages are JSON text,
// callbacks are a type parameter. The JS bindings live in `crate::js::api`.

pub mod drain;
pub mod interval;
pub mod lifecycle;
pub mod port;
pub mod queue;
pub mod registry;

pub use drain::{drain_workers, DrainStats};
pub use interval::{period_from_millis, IntervalId, IntervalScheduler, DEFAULT_PERIOD};
pub use lifecycle::{SpawnOptions, WorkerHandle};
pub use port::{WorkerEndpoint, WorkerId, WorkerPort, WorkerState};
pub use queue::{CallbackSlot, Message, MessageQueue};
pub use registry::{Inbound, WorkerRegistry};
