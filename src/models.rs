// ABOUTME: Re-export of the shared model types
// ABOUTME: Lets library code write `crate::models::ApplicationInstance`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use lti_core::models::*;
