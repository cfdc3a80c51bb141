// ABOUTME: Shared types for the LTI launch core workspace
// ABOUTME: Persisted model DTOs and the AppError vocabulary used by every crate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # lti-core
//!
//! Model types shared between the database layer, the LTI services and the
//! HTTP routes, plus the error taxonomy. Kept free of I/O so that tooling
//! can depend on it without pulling in sqlx or reqwest.

pub mod errors;
pub mod models;
