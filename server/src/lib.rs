//! Keyword-matching chat backend for the portfolio site.
//!
//! A message posted to `/api/chat` is rate limited per client, validated,
//! sanitized, scored against a fixed [`catalog::Catalog`] of canned answers,
//! and the winning answer is returned with only safe formatting markup left.

pub mod api;
pub mod catalog;
pub mod config;
pub mod rate_limit;
pub mod responder;
pub mod sanitize;
