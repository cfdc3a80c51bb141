// ABOUTME: Command implementations for lti-cli
// ABOUTME: One module per resource; each function takes the shared server resources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub mod instance;
pub mod keys;
pub mod organization;
pub mod registration;
