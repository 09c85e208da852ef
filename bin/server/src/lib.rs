//! portcullis web server.
//!
//! Signs users in through external OAuth providers, issues sessions, and
//! guards every request with the path policies from
//! [`portcullis_identity`].

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
