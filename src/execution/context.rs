use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options for compiling and running a program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Number of threads to use (0 = use the global rayon pool)
    pub thread_count: usize,
    /// Values of the symbolic dimensions the program refers to
    pub dim_bindings: HashMap<String, i64>,
    /// Dump the program text at trace level when it is compiled
    pub log_program: bool,
}

impl ExecutionOptions {
    /// Create a new execution options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads to use
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Bind a symbolic dimension
    pub fn bind_dim(mut self, name: &str, value: i64) -> Self {
        self.dim_bindings.insert(name.to_string(), value);
        self
    }

    /// Enable or disable the program dump
    pub fn enable_program_log(mut self, enable: bool) -> Self {
        self.log_program = enable;
        self
    }

    /// Parse options from JSON, e.g. `{"thread_count": 4, "dim_bindings": {"H": 8}}`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid execution options: {}", e)))
    }

    /// Build options from plugin configuration keys: `THREAD_COUNT`,
    /// `LOG_PROGRAM` and `DIM_BINDINGS` (a JSON object).
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let mut options = Self::new();
        for (key, value) in config {
            match key.as_str() {
                "THREAD_COUNT" => {
                    options.thread_count = usize::from_str(value.trim()).map_err(|_| {
                        Error::Config(format!(
                            "THREAD_COUNT must be a non-negative integer, got '{}'",
                            value
                        ))
                    })?;
                }
                "LOG_PROGRAM" => {
                    options.log_program = match value.trim().to_ascii_uppercase().as_str() {
                        "YES" | "TRUE" | "1" => true,
                        "NO" | "FALSE" | "0" => false,
                        _ => {
                            return Err(Error::Config(format!(
                                "LOG_PROGRAM must be YES or NO, got '{}'",
                                value
                            )))
                        }
                    };
                }
                "DIM_BINDINGS" => {
                    options.dim_bindings = serde_json::from_str(value).map_err(|e| {
                        Error::Config(format!(
                            "DIM_BINDINGS must be a JSON object of integers: {}",
                            e
                        ))
                    })?;
                }
                _ => return Err(Error::Config(format!("Unsupported config key {}", key))),
            }
        }
        Ok(options)
    }
}

/// Execution context shared by the kernels of one executable
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Options for execution
    options: ExecutionOptions,
    /// Thread pool for parallel kernels
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl ExecutionContext {
    /// Create a new execution context
    pub fn new(options: ExecutionOptions) -> Result<Self> {
        // Create thread pool if thread count is specified
        let thread_pool = if options.thread_count > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.thread_count)
                .build()
                .map_err(|e| Error::Execution(format!("failed to build thread pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self { options, thread_pool })
    }

    /// Get execution options
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Get thread pool
    pub fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        self.thread_pool.as_deref()
    }

    /// Run `op` inside the dedicated pool, or on the caller's pool when none
    /// is configured.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match self.thread_pool() {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
