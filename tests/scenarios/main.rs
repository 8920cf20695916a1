//! End-to-end run controller scenarios


mod corruption;
mod failure_handling;
mod fresh_start;
mod persistence;
mod resume;
mod subprocess_run;
