//! Integration tests for driftsync reconciliation between nodes and a coordinator

mod support;

mod convergence;
mod deletion;
mod last_writer_wins;
mod locking;
mod path_safety;
mod tcp_loopback;
