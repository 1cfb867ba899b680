//! Application state management
//!
//! Author: hephaex@gmail.com

use ewa_core::AppConfig;
use ewa_pipeline::Analyzer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Analysis requests served
    pub request_count: AtomicU64,
    /// Pipeline shared by all requests, so model handles are reused
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(config: AppConfig, analyzer: Arc<Analyzer>) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            analyzer,
        }
    }

    /// State with a Hub-backed analyzer built from config
    pub fn from_config(config: AppConfig) -> ewa_core::Result<Self> {
        let analyzer = Arc::new(Analyzer::from_config(&config)?);
        Ok(Self::new(config, analyzer))
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
