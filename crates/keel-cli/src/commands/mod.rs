pub mod check;
pub mod phase;
pub mod run;
