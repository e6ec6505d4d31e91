//! # condflags - Condition flags with debounced observers
//!
//! A [`Condition`] holds a set of boolean flags and a list of observers. Each
//! observer names a required subset of flags and an [`Action`]; the action
//! fires once whenever the flag set comes to cover that subset, and again
//! only after the requirement has been seen unmet in between.
//!
//! ## Core Concepts
//!
//! - **Flag set**: any [`FlagSet`] (integers, `BTreeSet`, `HashSet`, `bitflags` via [`flag_set!`])
//! - **Observer**: a required subset plus an action, removable through an [`ObserverHandle`]
//! - **Satisfaction episode**: an interval during which the flags keep covering a requirement
//! - **Execution context**: an ordered task queue ([`ExecutionContext`], [`SerialQueue`])
//!
//! Mutations never run observers on the calling thread. They signal a
//! coalescing recheck that runs later on the condition's default context.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use condflags::{Action, Condition, ExecutionContext, SerialQueue};
//!
//! const NETWORK: u8 = 0b01;
//! const DISK: u8 = 0b10;
//!
//! let queue: Arc<dyn ExecutionContext> = Arc::new(SerialQueue::named("ready")?);
//! let ready = Condition::new(queue, 0u8);
//!
//! ready.observe(NETWORK | DISK, Action::new("start", || println!("up")));
//! ready.set_on(&NETWORK);
//! ready.set_on(&DISK); // "up" is printed once, on the queue thread
//!
//! ready.wait_blocking(NETWORK | DISK, Duration::from_secs(1))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod condition;
pub mod context;
pub mod debounce;
pub mod error;
pub mod flags;
pub mod observer;

// Re-export primary types at crate root for convenience
pub use action::Action;
pub use condition::{Condition, ConditionConfig, KeepAlive};
pub use context::{ExecutionContext, SerialQueue, SerialQueueConfig, Task};
pub use debounce::Debouncer;
pub use error::{CondError, CondResult, ExecutionError, ValidationError};
pub use flags::FlagSet;
pub use observer::{ObserveOptions, ObserverHandle, ObserverId};
