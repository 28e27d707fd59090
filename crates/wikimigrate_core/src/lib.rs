pub mod batch;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod features;
pub mod remote;
pub mod report;
pub mod rules;
pub mod runtime;
pub mod selftest;
pub mod title;
