//! End-to-end tests across the member crates.
//!
//! These exercise the public facade: a durable array and a content store
//! opened, written, closed and reopened the way an application would use
//! them together.

#[path = "../common/mod.rs"]
mod common;

mod catalog;
mod facade;
