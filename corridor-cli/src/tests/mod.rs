//! Shared test harness modules for the corridor CLI.

use super::*;

mod helpers;
mod pipeline;
mod unit;
