pub mod sweep;

pub use sweep::start_sweep_task;
