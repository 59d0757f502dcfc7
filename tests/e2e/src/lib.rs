//! Shardline End-to-End Test Suite
//!
//! Starts real shard nodes on loopback sockets and drives them through
//! their public handles: transactions in, committed blocks out.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p shardline-e2e-tests --test three_node_shard -- --nocapture
//! cargo test -p shardline-e2e-tests --test member_failure -- --nocapture
//! ```

pub mod helpers;
