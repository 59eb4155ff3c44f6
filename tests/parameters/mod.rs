//! Integration tests for the parameter system
//!
//! These tests cover the parameter table, FUNCTIONS expressions and the
//! binding of theory arguments to the table.

// Table lookup, fix/release and JSON
mod table_tests;

// FUNCTIONS-block parsing and evaluation
mod expression_tests;
