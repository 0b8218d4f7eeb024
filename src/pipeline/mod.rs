pub mod artifacts;
pub mod job_runner;
pub mod orchestrator;
pub mod reducer;
