pub mod authored;
pub mod bot;
pub mod config;
pub mod contract;
pub mod error;
pub mod filter;
pub mod git;
pub mod model;
pub mod provider;
pub mod reporter;
pub mod rules;
pub mod tasks;
pub mod trestle;
