//! Bounded-concurrency scheduling of per-file chains.
//!
//! This module provides the run-wide side of a batch:
//!
//! - **Governor**: admits chains up to a fixed capacity, FIFO among waiters
//! - **Completion barrier**: `Governor::await_all` drains every admitted chain
//! - **PipelineRun / ChainOutcome**: per-chain lifecycle and terminal result
//!
//! # Architecture
//!
//! ```text
//!   enumerated items (byte order)
//!              │
//!        submit│  waits while all permits are taken
//!              ▼
//!     ┌──────────────────┐
//!     │  Semaphore (C)   │
//!     └────────┬─────────┘
//!              │ spawn, permit moves into the task
//!      ┌───────┼────────┐
//!      ▼       ▼        ▼
//!   chain 1  chain 2 … chain C     (each: project → fixer → quick-fix)
//!      │       │        │
//!      └───────┴────────┘
//!              ▼
//!         await_all (JoinSet drained)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use depfix::pipeline::{FixChain, FixConfig, OutputLayout};
//! use depfix::scheduler::Governor;
//!
//! let config = FixConfig::default().with_predictions_dir("data/predictions");
//! let layout = OutputLayout::from_config(&config);
//! let governor = Governor::new(config.concurrency, FixChain::from_config(&config))?;
//!
//! governor.submit(layout.work_item("nl_alpino-dev.conllu")).await?;
//! let (outcomes, stats) = governor.await_all().await;
//! ```

pub mod governor;
pub mod job;

pub use governor::{Governor, PoolError, PoolStats};
pub use job::{ChainOutcome, ChainState, PipelineRun};
