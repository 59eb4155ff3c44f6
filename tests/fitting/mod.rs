// Shared-parameter fits across blocks
mod global_fit_tests;

// Serial and accelerated evaluation
mod backend_tests;

// Cancellation and timeouts
mod control_tests;

// Poisson maximum likelihood on histograms
mod likelihood_tests;

// Command lists, fit ranges and result records
mod command_tests;
