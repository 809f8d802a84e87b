#![allow(clippy::missing_docs_in_private_items)]

pub mod config;
pub mod critic;
pub mod detection;
pub mod engine;
pub mod issue;
pub mod resolvers;
pub mod retrieval;

#[cfg(test)]
mod tests;
