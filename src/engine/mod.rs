//! # Engine Module
//!
//! Internal runtime implementation.
//!
//! This module contains all core building blocks:
//! - Ids, masks and flags
//! - The machine registry and subject pool
//! - Chunk (trait) and belt (detail) storage
//! - Mechanisms, subject records and deferred changes
//! - Chains, cursors and parts
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod flags;
pub mod error;
pub mod paradigm;
pub mod config;
pub mod component;
pub mod storage;
pub mod lock;
pub mod subject;
pub mod machine;
pub mod filter;
pub mod chunk;
pub mod subjective;
pub mod belt;
pub mod record;
pub mod deferred;
pub mod mechanism;
pub mod part;
pub mod cursor;
pub mod chain;
