pub mod pending_sweep;
