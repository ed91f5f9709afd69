//! Unit tests for the pure (storage-free) components.

mod dimension;
mod filters;
mod materialization;
