//! A mergeable priority queue with stable handles, a single-timer deadline
//! scheduler built on top of it, and an async stream of the items that
//! became due.
//!
//! Layers compose bottom to top: [`heap::PairingHeap`] is the bare
//! structure, [`events::Events`] adds named-event fan-out, [`stream::Stream`]
//! adds an async consumer, and [`scheduler::Scheduler`] ties all three to a
//! clock and timer source. Each layer implements [`queue::PriorityQueue`].

pub mod clock;
pub mod error;
pub mod events;
pub mod handle;
pub mod heap;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod stream;

pub use clock::{Clock, FakeClock, SystemClock, TimerSource, TokioTimerSource};
pub use error::{Error, Result};
pub use events::{Event, EventEmitter, Events};
pub use handle::{Handle, Ref};
pub use heap::PairingHeap;
pub use queue::{Polled, Priority, PriorityChange, PriorityQueue};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use stream::{Consumer, Stream};
