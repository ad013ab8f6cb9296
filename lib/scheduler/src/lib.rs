//! Trigger dispatch and scheduling for tidewater.
//!
//! - **Events**: verified inbound events and their correlation keys
//! - **Functions**: the name to trigger function registry
//! - **Dispatcher**: fans an event out to every matching trigger
//! - **Scheduler**: periodic firing of time and cron triggers

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod function;
pub mod schedule;
pub mod scheduler;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{DispatchError, FunctionError, RegistryError, ScheduleError};
pub use event::InboundEvent;
pub use function::{TriggerFunction, TriggerFunctionRegistry};
pub use schedule::CronSchedule;
pub use scheduler::Scheduler;
