// Built-in theory functions reached through the registry
mod builtin_tests;

// Global parts and their cache
mod global_part_tests;

// User-registered theory functions
mod user_function_tests;
