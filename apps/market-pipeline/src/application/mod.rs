//! Application Layer - Use cases and port definitions.
//!
//! Services here orchestrate the pipeline against port traits only; the
//! concrete Kafka, PostgreSQL and Redis adapters live in infrastructure.

/// Port interfaces for the durable log, relational store, fan-out and jobs.
pub mod ports;

/// Publisher, consumer and scheduler services.
pub mod services;
