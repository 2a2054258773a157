//! Small pure helpers shared by the server and the CLI.

pub mod size;
