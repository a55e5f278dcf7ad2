#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod boot;
pub mod cli;
pub mod config;
pub mod error;
pub mod guest_state;
pub mod hostname;
pub mod init;
pub mod keys;
pub mod logging;
pub mod paths;
pub mod ps;
pub mod resolver;
pub mod session;
pub mod supervisor;
pub mod tracker;
