//! # Suitability Parallel
//!
//! Execution strategies for the normalization engine.
//!
//! This crate provides:
//! - `ProcessingMode`: sequential or rayon-backed index mapping
//! - `BlockIterator`: fixed-size blocks covering a pixel window, for
//!   streaming reductions over rasters that don't fit in memory

pub mod blocks;
pub mod strategy;

pub use blocks::{Block, BlockIterator};
pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
