#![warn(clippy::pedantic)]
// Noisy doc/signature lints: would require annotating every pub async fn
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference: keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts for second/millisecond conversions and jitter arithmetic
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod notify;
pub mod rules;
pub mod runner;
pub mod session;
pub mod solver;
pub(crate) mod utils;

pub use errors::{AutosignError, AutosignResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
