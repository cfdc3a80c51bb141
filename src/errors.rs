// ABOUTME: Re-export of the shared error vocabulary
// ABOUTME: Lets library code write `crate::errors::{AppError, AppResult}`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use lti_core::errors::{AppError, AppResult, ErrorCode, ErrorDetails, Lti13ErrorKind};
