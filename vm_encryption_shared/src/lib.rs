// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT

pub mod error;
pub mod linux;
pub mod logger;
pub mod misc_helpers;
pub mod result;
pub mod version;
