//! Shared constants.

/// Number of safes requested per subgraph page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default maximum number of hops handed to the solver.
pub const DEFAULT_HOPS: u32 = 3;

/// Default solver timeout in milliseconds.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u64 = 10_000;
