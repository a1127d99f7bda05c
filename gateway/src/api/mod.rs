//! HTTP request handlers.

pub mod fragments;
pub mod teams;
