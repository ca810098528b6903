//! Lending Service - Micro-lending core: pooled funds lending to borrowers
//! at per-second compounding rates.

pub mod config;
pub mod dtos;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
