// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Backend invocation defaults
// =============================================================================

/// Default backend request timeout in seconds
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 10;

/// Default accepted status codes for a backend response when none are configured
pub const DEFAULT_ACCEPTED_STATUS: u16 = 200;

/// Default maximum pages fetched when a rule enables pagination
pub const DEFAULT_MAX_PAGES: u32 = 1;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default maximum number of decision cache entries held in memory
pub const DEFAULT_MAX_CACHE_ENTRIES: u64 = 100_000;

/// Default TTL applied to a `pass` decision when a rule does not configure one
pub const DEFAULT_PASS_TTL_SECS: u64 = 60;

/// Default TTL applied to a `fail` decision when a rule does not configure one
pub const DEFAULT_FAIL_TTL_SECS: u64 = 10;

/// `error` outcomes are never cached; this exists only as a documented zero
pub const ERROR_TTL_SECS: u64 = 0;

/// Whether strict-mode fingerprinting (folding in exported variables) is the
/// default, per spec §4.7
pub const DEFAULT_STRICT_MODE: bool = true;

// =============================================================================
// Sandbox defaults
// =============================================================================

/// Default directory separator used for sandbox containment prefix checks
pub const SANDBOX_SEPARATOR: char = std::path::MAIN_SEPARATOR;

// =============================================================================
// Rule chain defaults
// =============================================================================

/// Outcome reported when admission rejects a request (spec §4.4/§7)
pub const ADMISSION_REJECTED_REASON: &str = "admission rejected request";

/// Default outcome and message when no rule produces one (spec §4.6)
pub const DEFAULT_OUTCOME_PASS: &str = "pass";
pub const OUTCOME_FAIL: &str = "fail";
pub const OUTCOME_ERROR: &str = "error";
