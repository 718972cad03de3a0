#[macro_use]
extern crate tracing;

pub mod cli;
pub mod damage;
pub mod layout;
pub mod output;
pub mod rose;
pub mod surface;
pub mod utils;

#[cfg(test)]
mod tests;
