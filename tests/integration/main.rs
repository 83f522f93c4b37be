//! Integration tests for the background job scheduler.

mod scheduler_test;
