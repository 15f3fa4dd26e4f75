//! Domain model (IDs, task entity, wire event, outbox, errors, retry decisions).

pub mod decision;
pub mod errors;
pub mod event;
pub mod ids;
pub mod outbox;
pub mod state;
pub mod task;

pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::errors::{ErrorKind, ExecutionError, PipelineError};
pub use self::event::{CorrelationId, TaskEvent, lock_key};
pub use self::ids::{OutboxId, ParseIdError, TaskId};
pub use self::outbox::OutboxEntry;
pub use self::state::TaskStatus;
pub use self::task::{Task, TaskKey, TaskType, TransitionError};
