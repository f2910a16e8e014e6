//! Client library for legislative research chats.
//!
//! Streams answers from the hosted gateway function, keeps chat sessions
//! persisted in the background, meters a daily word budget, and serves the
//! command palette's cached search.

pub mod config;
pub mod models;
pub mod services;
