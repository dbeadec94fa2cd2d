//! csvchat - chat with a CSV file
//!
//! Upload a table, supply a Groq API key, and ask questions in plain
//! language. A tool-calling agent inspects, queries and plots the table and
//! answers in text, optionally with a chart.

pub mod agent;
pub mod chart;
pub mod cli;
pub mod config;
pub mod error;
pub mod provider;
pub mod server;
pub mod session;
pub mod table;
pub mod tool;
