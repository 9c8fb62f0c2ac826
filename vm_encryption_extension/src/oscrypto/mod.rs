// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
//! Online migration of a running Linux root file system onto a LUKS encrypted volume.

pub mod boot_config;
pub mod context;
pub mod distro;
pub mod encryption_state;
pub mod identity;
pub mod marker_store;
pub mod state;
pub mod state_machine;
pub mod states;
