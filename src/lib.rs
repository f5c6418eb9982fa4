pub mod annotate;
pub mod cli;
pub mod config;
pub mod detect;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod message;
pub mod model;
pub mod observer;
pub mod report;
pub mod selection;
pub mod service;
pub mod session;
pub mod storage;
