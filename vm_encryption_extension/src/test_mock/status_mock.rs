// Copyright (c) Microsoft Corporation
// SPDX-License-Identifier: MIT
use crate::common::StatusReporter;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub operation: String,
    pub status: String,
    pub code: i32,
    pub message: String,
}

#[derive(Default)]
pub struct MockStatusReporter {
    reports: Mutex<Vec<StatusReport>>,
}

impl MockStatusReporter {
    pub fn new() -> Self {
        MockStatusReporter::default()
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn count_with_code(&self, code: i32) -> usize {
        self.reports().iter().filter(|r| r.code == code).count()
    }

    pub fn last(&self) -> Option<StatusReport> {
        self.reports().last().cloned()
    }
}

impl StatusReporter for MockStatusReporter {
    fn do_status_report(&self, operation: &str, status: &str, status_code: i32, message: &str) {
        self.reports.lock().unwrap().push(StatusReport {
            operation: operation.to_string(),
            status: status.to_string(),
            code: status_code,
            message: message.to_string(),
        });
    }
}
