// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "TableTalk";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tabletalk";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".tabletalk";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tabletalk.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TABLETALK_CONFIG";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "TABLETALK_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "TABLETALK_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TABLETALK_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "TABLETALK_DATA_DIR";

/// Environment variable for the OpenAI API key
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Environment variable for the Anthropic API key
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5280;

// =============================================================================
// Analysis Budgets
// =============================================================================

/// Maximum LLM turns per analysis
pub const DEFAULT_MAX_STEPS: u32 = 8;

/// Wall-clock deadline for one analysis (seconds)
pub const DEFAULT_DEADLINE_SECS: u64 = 60;

/// Extra time the HTTP watchdog grants the loop to wind down on its own
/// before the request is failed with 504 (seconds)
pub const DEADLINE_GRACE_SECS: u64 = 5;

/// Hard row ceiling for any query result
pub const MAX_QUERY_ROWS: usize = 10_000;

/// Statement timeout for a single query (seconds)
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Provider retry schedule (milliseconds) for transient LLM failures
pub const LLM_RETRY_DELAYS_MS: &[u64] = &[250, 1_000];

/// Size of each `answer_chunk` event (characters)
pub const ANSWER_CHUNK_CHARS: usize = 64;

/// Number of recent query tables carried into the final response
pub const MAX_RESPONSE_TABLES: usize = 5;

/// Consecutive `QUERY_FAILED` results of one tool before the loop gives up
pub const MAX_CONSECUTIVE_TOOL_FAILURES: u32 = 2;

// =============================================================================
// QuerySpec Complexity Limits
// =============================================================================

/// Maximum number of filter conditions in one spec
pub const MAX_FILTERS: usize = 20;

/// Maximum number of group-by columns in one spec
pub const MAX_GROUP_BY: usize = 10;

/// Maximum number of aggregations in one spec
pub const MAX_AGGREGATIONS: usize = 20;

// =============================================================================
// Query Cache
// =============================================================================

/// Maximum cached query results
pub const QUERY_CACHE_MAX_ENTRIES: usize = 100;

/// Cached result time-to-live (seconds)
pub const QUERY_CACHE_TTL_SECS: u64 = 300;

// =============================================================================
// Datasets
// =============================================================================

/// DuckDB database file name
pub const DUCKDB_DB_FILENAME: &str = "datasets.duckdb";

/// Maximum columns accepted at ingest
pub const MAX_DATASET_COLUMNS: usize = 500;

/// Maximum rows returned by `sample_rows`
pub const MAX_SAMPLE_ROWS: usize = 100;

/// Example values kept per column schema
pub const SCHEMA_EXAMPLE_VALUES: usize = 3;

/// Dataset time-to-live before garbage collection (hours)
pub const DEFAULT_DATASET_TTL_HOURS: u64 = 24;

/// Interval between dataset GC sweeps (seconds)
pub const DATASET_CLEANUP_INTERVAL_SECS: u64 = 600;

/// Maximum upload size (bytes)
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// =============================================================================
// Field Resolution
// =============================================================================

/// Maximum candidate columns returned per resolve_fields term
pub const MAX_RESOLVE_CANDIDATES: usize = 5;

// =============================================================================
// Rate Limiting
// =============================================================================

/// Requests allowed per window per client on /analyze
pub const RATE_LIMIT_MAX_REQUESTS: usize = 100;

/// Rate-limit window (seconds)
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

// =============================================================================
// Shutdown
// =============================================================================

/// Grace period for background tasks during shutdown (seconds)
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
