mod commands;
mod logging;

pub use commands::run;
