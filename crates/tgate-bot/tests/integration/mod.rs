//! Integration tests for tgate-bot.
//!
//! These drive whole cycles through the controller with in-memory feeds and
//! a scripted execution adapter.

pub mod common;
